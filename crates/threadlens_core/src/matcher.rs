use std::fmt;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use scraper::{ElementRef, Selector};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("invalid selector `{pattern}`: {message}")]
    InvalidSelector { pattern: String, message: String },
}

/// A compiled CSS selector identifying a class of content nodes.
///
/// Two patterns are equal when their source text is equal; the discovery
/// engine keys its registrations by that text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    selector: Selector,
}

impl Pattern {
    pub fn parse(source: &str) -> Result<Self, PatternError> {
        let trimmed = source.trim();
        let selector = Selector::parse(trimmed).map_err(|err| PatternError::InvalidSelector {
            pattern: trimmed.to_string(),
            message: err.to_string(),
        })?;
        Ok(Self {
            source: trimmed.to_string(),
            selector,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    /// Tests a single node. Non-element nodes never match.
    pub fn matches(&self, node: NodeRef<'_, Node>) -> bool {
        ElementRef::wrap(node).is_some_and(|element| self.selector.matches(&element))
    }

    /// Returns the node itself (when it matches) followed by every matching
    /// descendant, in document order.
    pub fn match_subtree(&self, root: NodeRef<'_, Node>) -> Vec<NodeId> {
        root.descendants()
            .filter(|node| self.matches(*node))
            .map(|node| node.id())
            .collect()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
