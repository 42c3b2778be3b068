//! Mutable HTML document with stable node identities and a mutation feed.
//!
//! Node ids come from the underlying `ego_tree` arena and are never reused:
//! detaching a node leaves it in the arena, unreachable from the root.

use std::cell::RefCell;
use std::fmt;
use std::fmt::Write as _;
use std::rc::Rc;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use scraper::{ElementRef, Html};
use tokio::sync::mpsc::UnboundedSender;

use crate::matcher::Pattern;

pub type SharedDocument = Rc<RefCell<Document>>;

/// One structural change, in the shape of a browser `childList` record.
///
/// Bulk replacements (`set_inner_html`) report the container as `target` and
/// leave `added` empty: consumers that only walk `added` will not see the new
/// content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("node {0:?} is not part of the document")]
    UnknownNode(NodeId),
    #[error("node {0:?} is not an element")]
    NotAnElement(NodeId),
    #[error("could not rebuild element <{0}>")]
    Rebuild(String),
}

pub struct Document {
    html: Html,
    observers: Vec<(ObserverId, UnboundedSender<MutationRecord>)>,
    next_observer: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::parse("<html><head></head><body></body></html>")
    }

    pub fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
            observers: Vec::new(),
            next_observer: 0,
        }
    }

    pub fn into_shared(self) -> SharedDocument {
        Rc::new(RefCell::new(self))
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn root(&self) -> NodeRef<'_, Node> {
        self.html.tree.root()
    }

    pub fn node(&self, id: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(id)
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.node(id).and_then(ElementRef::wrap)
    }

    pub fn body(&self) -> Option<NodeId> {
        self.html
            .root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .find(|element| element.value().name() == "body")
            .map(|element| element.id())
    }

    /// True when the node is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        let root = self.html.tree.root().id();
        match self.node(id) {
            Some(node) => node.id() == root || node.ancestors().any(|a| a.id() == root),
            None => false,
        }
    }

    /// All attached nodes matching `pattern`, in document order.
    pub fn select(&self, pattern: &Pattern) -> Vec<NodeId> {
        pattern.match_subtree(self.root())
    }

    /// Matching nodes inside `scope`, excluding `scope` itself.
    pub fn select_within(&self, scope: NodeId, pattern: &Pattern) -> Vec<NodeId> {
        match self.node(scope) {
            Some(node) => pattern
                .match_subtree(node)
                .into_iter()
                .filter(|id| *id != scope)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn first_within(&self, scope: NodeId, pattern: &Pattern) -> Option<NodeId> {
        self.select_within(scope, pattern).into_iter().next()
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<String> {
        self.element(id)
            .and_then(|element| element.value().attr(name).map(str::to_string))
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.element(id)
            .is_some_and(|element| element.value().attr(name).is_some())
    }

    pub fn text(&self, id: NodeId) -> Option<String> {
        self.element(id).map(|element| element.text().collect())
    }

    pub fn inner_html(&self, id: NodeId) -> Option<String> {
        self.element(id).map(|element| element.inner_html())
    }

    pub fn outer_html(&self, id: NodeId) -> Option<String> {
        self.element(id).map(|element| element.html())
    }

    /// Parses `markup` and appends the resulting nodes to `parent`, reporting
    /// each top-level node as added.
    pub fn append_html(&mut self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>, DocumentError> {
        self.require_element(parent)?;
        let added = self.graft_fragment(parent, markup)?;
        self.emit(MutationRecord {
            target: parent,
            added: added.clone(),
            removed: Vec::new(),
        });
        Ok(added)
    }

    /// Replaces every child of `id` with the parsed `markup`.
    pub fn set_inner_html(&mut self, id: NodeId, markup: &str) -> Result<(), DocumentError> {
        self.require_element(id)?;
        let removed = self.detach_children(id);
        self.graft_fragment(id, markup)?;
        self.emit(MutationRecord {
            target: id,
            added: Vec::new(),
            removed,
        });
        Ok(())
    }

    /// Replaces every child of `id` with a single text node.
    pub fn set_text(&mut self, id: NodeId, text: &str) -> Result<(), DocumentError> {
        self.require_element(id)?;
        let removed = self.detach_children(id);
        let added = self.graft_fragment(id, &escape_text(text))?;
        self.emit(MutationRecord {
            target: id,
            added,
            removed,
        });
        Ok(())
    }

    pub fn remove(&mut self, id: NodeId) -> Result<(), DocumentError> {
        let parent = self
            .node(id)
            .and_then(|node| node.parent())
            .map(|parent| parent.id())
            .ok_or(DocumentError::UnknownNode(id))?;
        if let Some(mut node) = self.html.tree.get_mut(id) {
            node.detach();
        }
        self.emit(MutationRecord {
            target: parent,
            added: Vec::new(),
            removed: vec![id],
        });
        Ok(())
    }

    /// Sets (`Some`) or removes (`None`) an attribute, keeping the node id.
    ///
    /// Attribute changes are not reported to observers.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: Option<&str>) -> Result<(), DocumentError> {
        let (tag, attrs) = {
            let element = self.require_element(id)?;
            let tag = element.value().name().to_string();
            let mut attrs: Vec<(String, String)> = element
                .value()
                .attrs()
                .filter(|(key, _)| !key.eq_ignore_ascii_case(name))
                .map(|(key, val)| (key.to_string(), val.to_string()))
                .collect();
            if let Some(value) = value {
                attrs.push((name.to_ascii_lowercase(), value.to_string()));
            }
            (tag, attrs)
        };

        let mut markup = format!("<{tag}");
        for (key, val) in &attrs {
            let _ = write!(markup, " {key}=\"{}\"", escape_attr(val));
        }
        let _ = write!(markup, "></{tag}>");

        let fragment = Html::parse_fragment(&markup);
        let rebuilt = fragment
            .root_element()
            .children()
            .find(|child| {
                child
                    .value()
                    .as_element()
                    .is_some_and(|element| element.name() == tag)
            })
            .map(|child| child.value().clone())
            .ok_or_else(|| DocumentError::Rebuild(tag.clone()))?;

        let mut node = self
            .html
            .tree
            .get_mut(id)
            .ok_or(DocumentError::UnknownNode(id))?;
        *node.value() = rebuilt;
        Ok(())
    }

    /// Registers a mutation feed. Records are sent for every structural change
    /// until the observer is detached or its receiver is dropped.
    pub fn attach_observer(&mut self, tx: UnboundedSender<MutationRecord>) -> ObserverId {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.observers.push((id, tx));
        id
    }

    pub fn detach_observer(&mut self, id: ObserverId) {
        self.observers.retain(|(observer, _)| *observer != id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    fn emit(&mut self, record: MutationRecord) {
        self.observers.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in &self.observers {
            let _ = tx.send(record.clone());
        }
    }

    fn require_element(&self, id: NodeId) -> Result<ElementRef<'_>, DocumentError> {
        let node = self.node(id).ok_or(DocumentError::UnknownNode(id))?;
        ElementRef::wrap(node).ok_or(DocumentError::NotAnElement(id))
    }

    fn detach_children(&mut self, id: NodeId) -> Vec<NodeId> {
        let children: Vec<NodeId> = self
            .node(id)
            .map(|node| node.children().map(|child| child.id()).collect())
            .unwrap_or_default();
        for child in &children {
            if let Some(mut node) = self.html.tree.get_mut(*child) {
                node.detach();
            }
        }
        children
    }

    fn graft_fragment(&mut self, parent: NodeId, markup: &str) -> Result<Vec<NodeId>, DocumentError> {
        let fragment = Html::parse_fragment(markup);
        let mut added = Vec::new();
        for child in fragment.root_element().children() {
            added.push(self.graft(parent, child)?);
        }
        Ok(added)
    }

    fn graft(&mut self, parent: NodeId, source: NodeRef<'_, Node>) -> Result<NodeId, DocumentError> {
        let id = {
            let mut parent_node = self
                .html
                .tree
                .get_mut(parent)
                .ok_or(DocumentError::UnknownNode(parent))?;
            parent_node.append(source.value().clone()).id()
        };
        for child in source.children() {
            self.graft(id, child)?;
        }
        Ok(id)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

pub fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub fn escape_attr(input: &str) -> String {
    escape_text(input).replace('"', "&quot;")
}
