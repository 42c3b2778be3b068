use threadlens_core::{Document, NodeId, Pattern};
use threadlens_engine::{
    build_search_query, html_to_prompt_text, ActionContext, ActionKind, ActionOptions,
    ImageCandidate, InstructionResolver, DEFAULT_QUERY_LENGTH, DEFAULT_SEARCH_LIMIT,
};
use url::Url;

use crate::integration::{resolve_url, IntegrationError, ItemMetadata, PageIntegration};
use crate::ui_builder::{build_action_panel, ActionSlot, ItemUi};

const TITLE: &str = "h1, h2, .title";
const BODY: &str = r#"[itemprop="articleBody"], .content"#;
const ANALYZE_FALLBACK: &str = "Analyze the following content:";

/// A single "Analyze" action on `<article>`-like items of configured hosts.
#[derive(Debug, Clone)]
pub struct ArticleIntegration {
    hosts: Vec<String>,
    item_pattern: String,
}

impl ArticleIntegration {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
            item_pattern: "article".to_string(),
        }
    }

    pub fn with_item_pattern(mut self, pattern: &str) -> Self {
        self.item_pattern = pattern.trim().to_string();
        self
    }

    pub fn analyze_kind() -> ActionKind {
        ActionKind::Custom("analyze".to_string())
    }
}

impl PageIntegration for ArticleIntegration {
    fn name(&self) -> &'static str {
        "article"
    }

    fn should_activate(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        self.hosts
            .iter()
            .any(|wanted| host == wanted || host.ends_with(&format!(".{wanted}")))
    }

    fn item_pattern(&self) -> &str {
        &self.item_pattern
    }

    fn extract_metadata(&self, document: &Document, item: NodeId, page_url: &Url) -> Option<ItemMetadata> {
        let pattern = Pattern::parse(TITLE).ok()?;
        let title = document
            .first_within(item, &pattern)
            .and_then(|id| document.text(id))
            .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|text| !text.is_empty())?;
        Some(ItemMetadata {
            title,
            community: page_url.host_str().map(str::to_string),
            link: page_url.to_string(),
            attached_link: String::new(),
        })
    }

    fn build_ui(&self, document: &mut Document, item: NodeId) -> Result<ItemUi, IntegrationError> {
        let slot = ActionSlot::new(Self::analyze_kind(), "Analyze", "analyze-button", "result-container");
        build_action_panel(document, item, &[slot])
    }

    fn extract_content(&self, document: &Document, item: NodeId) -> String {
        let body = Pattern::parse(BODY)
            .ok()
            .and_then(|pattern| document.first_within(item, &pattern));
        body.and_then(|id| document.inner_html(id))
            .map(|html| html_to_prompt_text(&html))
            .unwrap_or_default()
    }

    fn extract_images(&self, document: &Document, item: NodeId, page_url: &Url) -> Vec<ImageCandidate> {
        let Ok(pattern) = Pattern::parse("img[src]") else {
            return Vec::new();
        };
        document
            .select_within(item, &pattern)
            .into_iter()
            .filter_map(|id| {
                let src = resolve_url(page_url, &document.attr(id, "src")?)?;
                let size = |name| document.attr(id, name).and_then(|v| v.trim().parse().ok());
                Some(ImageCandidate::with_size(src, size("width"), size("height")))
            })
            .collect()
    }

    fn format_context(&self, metadata: &ItemMetadata, content: &str, transcript: Option<&str>) -> String {
        let mut formatted = format!("Title: {}\nContent:\n{}", metadata.title, content);
        if let Some(transcript) = transcript {
            formatted.push_str("\n\nTranscript: ");
            formatted.push_str(transcript);
        }
        formatted.trim().to_string()
    }

    fn build_options(&self, kind: &ActionKind, metadata: &ItemMetadata, context: &ActionContext) -> ActionOptions {
        if *kind != Self::analyze_kind() {
            return ActionOptions::default();
        }
        ActionOptions {
            use_web: true,
            search_query: Some(build_search_query(
                &metadata.title,
                &context.primary_text,
                DEFAULT_QUERY_LENGTH,
            )),
            search_limit: DEFAULT_SEARCH_LIMIT,
            ..ActionOptions::default()
        }
    }

    fn instruction(&self, kind: &ActionKind, standard: &dyn InstructionResolver) -> String {
        let instruction = standard.instruction(kind);
        if instruction.is_empty() {
            ANALYZE_FALLBACK.to_string()
        } else {
            instruction
        }
    }
}
