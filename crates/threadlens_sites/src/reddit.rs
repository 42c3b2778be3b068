use threadlens_core::{Document, NodeId, Pattern};
use threadlens_engine::{
    build_search_query, html_to_prompt_text, ActionContext, ActionKind, ActionOptions,
    ImageCandidate, PromptMode, DEFAULT_QUERY_LENGTH,
};
use url::Url;

use crate::integration::{resolve_url, IntegrationError, ItemMetadata, PageIntegration};
use crate::ui_builder::{build_action_panel, ActionSlot, ItemUi};

const POST: &str = "shreddit-post";
const TITLE: &str = r#"[id*="post-title"]"#;
const ATTACHED_LINK: &str = r#".post-link, [slot="post-media-container"] a"#;
const SELF_TEXT: &str = ".shreddit-post-selftext.userscript-code, shreddit-post-text-body";
const INLINE_IMAGES: &str = "img.non-lightboxed-content";
const GALLERY_LINKS: &str = r#"a[href*="preview.redd.it"], a[href*="i.redd.it"]"#;
const CAPTIONS: &str = "shreddit-player shreddit-media-ui[caption-url], shreddit-player[caption-url]";
const WEB_SEARCH_LIMIT: usize = 6;

/// Reddit posts (`shreddit-post`) with TL;DR, Answer and Fact Check actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedditIntegration;

impl RedditIntegration {
    pub fn new() -> Self {
        Self
    }

    pub fn slots() -> Vec<ActionSlot> {
        vec![
            ActionSlot::new(ActionKind::Tldr, "TL;DR", "tldr-button", "tldr-container"),
            ActionSlot::new(ActionKind::Answer, "Answer", "answer-button", "answer-container"),
            ActionSlot::new(
                ActionKind::FactCheck,
                "Fact Check",
                "factcheck-button",
                "factcheck-container",
            ),
        ]
    }
}

impl PageIntegration for RedditIntegration {
    fn name(&self) -> &'static str {
        "reddit"
    }

    fn should_activate(&self, url: &Url) -> bool {
        url.host_str().is_some_and(|host| host.contains("reddit.com"))
    }

    fn item_pattern(&self) -> &str {
        POST
    }

    fn extract_metadata(&self, document: &Document, item: NodeId, page_url: &Url) -> Option<ItemMetadata> {
        let title_node = first(document, item, TITLE);
        let title = title_node
            .and_then(|id| document.text(id))
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .or_else(|| document.attr(item, "post-title").map(|t| t.trim().to_string()))
            .filter(|text| !text.is_empty())?;

        let link = title_node
            .and_then(|id| document.attr(id, "href"))
            .or_else(|| document.attr(item, "permalink"))
            .and_then(|href| page_url.join(&href).ok())
            .unwrap_or_else(|| page_url.clone());
        let subreddit = subreddit_from_url(&link)?;

        let attached_link = first(document, item, ATTACHED_LINK)
            .and_then(|id| document.attr(id, "href"))
            .and_then(|href| page_url.join(&href).ok())
            .map(|url| url.to_string())
            .unwrap_or_default();

        Some(ItemMetadata {
            title,
            community: Some(subreddit),
            link: link.to_string(),
            attached_link,
        })
    }

    fn build_ui(&self, document: &mut Document, item: NodeId) -> Result<ItemUi, IntegrationError> {
        build_action_panel(document, item, &Self::slots())
    }

    fn extract_content(&self, document: &Document, item: NodeId) -> String {
        first(document, item, SELF_TEXT)
            .and_then(|id| document.inner_html(id))
            .map(|html| html_to_prompt_text(&html))
            .unwrap_or_default()
    }

    fn extract_images(&self, document: &Document, item: NodeId, page_url: &Url) -> Vec<ImageCandidate> {
        let mut candidates = Vec::new();
        if let Ok(pattern) = Pattern::parse(INLINE_IMAGES) {
            for id in document.select_within(item, &pattern) {
                if let Some(src) = document.attr(id, "src").and_then(|src| resolve_url(page_url, &src)) {
                    candidates.push(ImageCandidate::with_size(
                        src,
                        dimension(document, id, "width"),
                        dimension(document, id, "height"),
                    ));
                }
            }
        }
        if let Ok(pattern) = Pattern::parse(GALLERY_LINKS) {
            for id in document.select_within(item, &pattern) {
                let Some(href) = document.attr(id, "href").and_then(|href| resolve_url(page_url, &href)) else {
                    continue;
                };
                let lower = href.to_ascii_lowercase();
                if [".jpg", ".jpeg", ".png"].iter().any(|ext| lower.contains(ext)) {
                    candidates.push(ImageCandidate::new(href));
                }
            }
        }
        candidates
    }

    fn transcript_url(&self, document: &Document, item: NodeId, page_url: &Url) -> Option<String> {
        first(document, item, CAPTIONS)
            .and_then(|id| document.attr(id, "caption-url"))
            .and_then(|href| resolve_url(page_url, &href))
    }

    fn format_context(&self, metadata: &ItemMetadata, content: &str, transcript: Option<&str>) -> String {
        let mut formatted = format!(
            "Subreddit: {}\nPost Title: {}\nPost Content:\n{}\n{}",
            metadata.community.as_deref().unwrap_or_default(),
            metadata.title,
            metadata.attached_link,
            content
        );
        if let Some(captions) = transcript {
            formatted.push_str("\n\nVideo closed captions: ");
            formatted.push_str(captions);
        }
        formatted.trim().to_string()
    }

    fn build_options(&self, kind: &ActionKind, metadata: &ItemMetadata, context: &ActionContext) -> ActionOptions {
        let mode = match kind {
            ActionKind::Answer => PromptMode::Answer,
            ActionKind::FactCheck => PromptMode::FactCheck,
            _ => return ActionOptions::default(),
        };
        ActionOptions {
            use_web: true,
            mode,
            search_query: Some(build_search_query(
                &metadata.title,
                &context.primary_text,
                DEFAULT_QUERY_LENGTH,
            )),
            search_limit: WEB_SEARCH_LIMIT,
            ..ActionOptions::default()
        }
    }
}

/// `rust` for any url whose path contains `/r/rust/...`.
pub fn subreddit_from_url(url: &Url) -> Option<String> {
    let segments: Vec<&str> = url.path_segments()?.collect();
    segments
        .windows(2)
        .find(|pair| pair[0] == "r" && !pair[1].is_empty())
        .map(|pair| pair[1].to_string())
}

fn first(document: &Document, scope: NodeId, selector: &str) -> Option<NodeId> {
    let pattern = Pattern::parse(selector).ok()?;
    document.first_within(scope, &pattern)
}

fn dimension(document: &Document, id: NodeId, name: &str) -> Option<u32> {
    document
        .attr(id, name)
        .and_then(|value| value.trim().trim_end_matches("px").parse().ok())
}
