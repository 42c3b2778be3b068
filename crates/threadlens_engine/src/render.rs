use std::time::Duration;

use ego_tree::NodeId;
use pulldown_cmark::{html, Options, Parser};
use scraper::{Html, Selector};

use crate::ui::ResultSurface;

/// Elements removed from rendered output along with their content.
pub const BLOCKED_ELEMENTS: &[&str] = &["script", "style", "noscript", "iframe", "template"];

pub fn markdown_to_html(markdown: &str) -> String {
    let options = Options::ENABLE_TABLES
        | Options::ENABLE_STRIKETHROUGH
        | Options::ENABLE_TASKLISTS
        | Options::ENABLE_FOOTNOTES;
    let parser = Parser::new_ext(markdown, options);
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, parser);
    out
}

/// Drops every blocked element from an HTML fragment.
pub fn sanitize_html(fragment: &str) -> String {
    let Ok(blocked) = Selector::parse(&BLOCKED_ELEMENTS.join(", ")) else {
        return String::new();
    };
    let mut html = Html::parse_fragment(fragment);
    let doomed: Vec<NodeId> = html.select(&blocked).map(|element| element.id()).collect();
    for id in doomed {
        if let Some(mut node) = html.tree.get_mut(id) {
            node.detach();
        }
    }
    html.root_element().inner_html()
}

/// Sanitized HTML for a reply followed by the generation time.
pub fn render_result_html(markdown: &str, elapsed: Duration) -> String {
    format!(
        "{}\n<em>(Generated in {} ms)</em>",
        sanitize_html(&markdown_to_html(markdown)),
        rounded_millis(elapsed)
    )
}

pub fn rounded_millis(elapsed: Duration) -> u64 {
    (elapsed.as_secs_f64() * 1000.0).round() as u64
}

pub trait Renderer {
    fn render(&self, surface: &dyn ResultSurface, text: &str, elapsed: Duration);
}

impl<F> Renderer for F
where
    F: Fn(&dyn ResultSurface, &str, Duration),
{
    fn render(&self, surface: &dyn ResultSurface, text: &str, elapsed: Duration) {
        (self)(surface, text, elapsed)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl Renderer for MarkdownRenderer {
    fn render(&self, surface: &dyn ResultSurface, text: &str, elapsed: Duration) {
        surface.set_html(&render_result_html(text, elapsed));
    }
}
