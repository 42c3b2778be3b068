//! The contract every site variant implements, and the shared wiring that
//! turns discovered items into bound actions.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use threadlens_core::{
    DiscoveryEngine, Document, DocumentError, NodeId, ObserveOptions, Pattern, PatternError,
    SharedDocument, Subscription,
};
use threadlens_engine::{
    ActionBinding, ActionContext, ActionKind, ActionOptions, ContextCollector, ContextError,
    ContextSupplier, DomControl, DomSurface, ImageCandidate, InstructionResolver, OptionsBuilder,
    Orchestrator,
};
use threadlens_logging::{lens_debug, lens_trace};
use url::Url;

use crate::ui_builder::ItemUi;

/// Marks items that already carry a panel.
pub const ATTACHED_MARKER: &str = "data-threadlens-attached";

#[derive(Debug, thiserror::Error)]
pub enum IntegrationError {
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error("missing element `{0}`")]
    MissingElement(String),
    #[error("invalid page url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("document is busy")]
    Busy,
}

/// Per-item facts extracted once, when the item is first discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemMetadata {
    pub title: String,
    /// Subreddit, channel or section, when the site has one.
    pub community: Option<String>,
    pub link: String,
    pub attached_link: String,
}

/// Controls mapped to the action bound to them.
#[derive(Clone, Default)]
pub struct Bindings {
    inner: Rc<RefCell<HashMap<NodeId, ActionBinding>>>,
}

impl Bindings {
    pub fn register(&self, control: NodeId, binding: ActionBinding) {
        self.inner.borrow_mut().insert(control, binding);
    }

    pub fn get(&self, control: NodeId) -> Option<ActionBinding> {
        self.inner.borrow().get(&control).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().clear();
    }
}

/// Everything an integration needs from the page it runs on.
#[derive(Clone)]
pub struct PageContext {
    pub url: Url,
    pub document: SharedDocument,
    pub discovery: DiscoveryEngine,
    pub orchestrator: Orchestrator,
    pub collector: ContextCollector,
    pub instructions: Rc<dyn InstructionResolver>,
    pub bindings: Bindings,
}

pub trait PageIntegration {
    fn name(&self) -> &'static str;

    fn should_activate(&self, url: &Url) -> bool;

    /// Selector for the content items this site decorates.
    fn item_pattern(&self) -> &str;

    /// Site-specific setup, run once before items are watched.
    fn init(&self, _page: &PageContext) -> Result<(), IntegrationError> {
        Ok(())
    }

    fn extract_metadata(&self, document: &Document, item: NodeId, page_url: &Url) -> Option<ItemMetadata>;

    fn build_ui(&self, document: &mut Document, item: NodeId) -> Result<ItemUi, IntegrationError>;

    /// Prompt-ready text of the item's main content region.
    fn extract_content(&self, document: &Document, item: NodeId) -> String;

    /// Image candidates with urls already resolved against `page_url`.
    fn extract_images(&self, _document: &Document, _item: NodeId, _page_url: &Url) -> Vec<ImageCandidate> {
        Vec::new()
    }

    fn transcript_url(&self, _document: &Document, _item: NodeId, _page_url: &Url) -> Option<String> {
        None
    }

    fn format_context(&self, metadata: &ItemMetadata, content: &str, transcript: Option<&str>) -> String;

    fn build_options(&self, kind: &ActionKind, metadata: &ItemMetadata, context: &ActionContext) -> ActionOptions;

    fn instruction(&self, kind: &ActionKind, standard: &dyn InstructionResolver) -> String {
        standard.instruction(kind)
    }

    /// Binds every slot of `item.ui` to the orchestrator. Returns the number
    /// of bindings registered.
    fn attach_handlers(&self, page: &PageContext, item: &ItemHandle) -> usize {
        for (kind, slot) in &item.ui.slots {
            let binding = ActionBinding::new(
                kind.clone(),
                Rc::new(DomControl::new(page.document.clone(), slot.control)),
                Rc::new(DomSurface::new(page.document.clone(), slot.surface)),
                Rc::new(ItemContext::new(item.clone(), page.collector.clone())),
                Rc::new(ItemInstructions {
                    item: item.clone(),
                    standard: page.instructions.clone(),
                }),
                Rc::new(ItemOptions { item: item.clone() }),
            );
            page.bindings.register(slot.control, binding);
        }
        item.ui.slots.len()
    }

    fn cleanup(&self) {}
}

/// A discovered item with its integration, metadata and panel.
#[derive(Clone)]
pub struct ItemHandle {
    pub integration: Rc<dyn PageIntegration>,
    pub document: SharedDocument,
    pub node: NodeId,
    pub page_url: Url,
    pub metadata: Rc<ItemMetadata>,
    pub ui: ItemUi,
}

/// Re-extracts the item's content on every invocation.
pub struct ItemContext {
    item: ItemHandle,
    collector: ContextCollector,
}

impl ItemContext {
    pub fn new(item: ItemHandle, collector: ContextCollector) -> Self {
        Self { item, collector }
    }
}

#[async_trait::async_trait(?Send)]
impl ContextSupplier for ItemContext {
    async fn supply(&self) -> Result<ActionContext, ContextError> {
        let integration = &self.item.integration;
        let (content, images, transcript_url) = {
            let document = self
                .item
                .document
                .try_borrow()
                .map_err(|_| ContextError::Other("document is busy".to_string()))?;
            if !document.is_attached(self.item.node) {
                return Err(ContextError::Detached);
            }
            (
                integration.extract_content(&document, self.item.node),
                integration.extract_images(&document, self.item.node, &self.item.page_url),
                integration.transcript_url(&document, self.item.node, &self.item.page_url),
            )
        };

        let media = self.collector.collect_media(&images).await;
        let transcript = self.collector.fetch_transcript(transcript_url.as_deref()).await;
        let formatted = integration.format_context(&self.item.metadata, &content, transcript.as_deref());
        lens_trace!(
            "{}: context with {} media item(s), transcript: {}",
            integration.name(),
            media.len(),
            transcript.is_some()
        );
        Ok(ActionContext {
            primary_text: content,
            media,
            transcript,
            formatted,
        })
    }
}

struct ItemInstructions {
    item: ItemHandle,
    standard: Rc<dyn InstructionResolver>,
}

impl InstructionResolver for ItemInstructions {
    fn instruction(&self, kind: &ActionKind) -> String {
        self.item.integration.instruction(kind, self.standard.as_ref())
    }
}

struct ItemOptions {
    item: ItemHandle,
}

impl OptionsBuilder for ItemOptions {
    fn options(&self, kind: &ActionKind, context: &ActionContext) -> ActionOptions {
        self.item
            .integration
            .build_options(kind, &self.item.metadata, context)
    }
}

/// Absolute form of a possibly relative `href` found on the page.
pub fn resolve_url(page_url: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    page_url.join(href).ok().map(|url| url.to_string())
}

/// Decorates every current and future item matching the integration's
/// pattern. Items are marked with [`ATTACHED_MARKER`] so a panel is built at
/// most once, even across discovery resets.
pub fn watch_items(
    integration: Rc<dyn PageIntegration>,
    page: &PageContext,
) -> Result<Subscription, IntegrationError> {
    let pattern = Pattern::parse(integration.item_pattern())?;
    let page_for_callback = page.clone();
    let subscription = page.discovery.observe(
        &pattern,
        move |node| -> anyhow::Result<()> {
            decorate_item(&integration, &page_for_callback, node)?;
            Ok(())
        },
        ObserveOptions::default(),
    );
    Ok(subscription)
}

fn decorate_item(
    integration: &Rc<dyn PageIntegration>,
    page: &PageContext,
    node: NodeId,
) -> Result<bool, IntegrationError> {
    let (metadata, ui) = {
        let mut document = page
            .document
            .try_borrow_mut()
            .map_err(|_| IntegrationError::Busy)?;
        if document.has_attr(node, ATTACHED_MARKER) {
            return Ok(false);
        }
        document.set_attr(node, ATTACHED_MARKER, Some("1"))?;
        let Some(metadata) = integration.extract_metadata(&document, node, &page.url) else {
            lens_debug!("{}: item {:?} has no usable metadata", integration.name(), node);
            return Ok(false);
        };
        let ui = integration.build_ui(&mut document, node)?;
        (metadata, ui)
    };

    let handle = ItemHandle {
        integration: integration.clone(),
        document: page.document.clone(),
        node,
        page_url: page.url.clone(),
        metadata: Rc::new(metadata),
        ui,
    };
    let bound = integration.attach_handlers(page, &handle);
    lens_debug!(
        "{}: decorated {:?} ({:?}) with {} action(s)",
        integration.name(),
        node,
        handle.metadata.title,
        bound
    );
    Ok(true)
}
