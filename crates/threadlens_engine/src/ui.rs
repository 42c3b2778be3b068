//! The two UI handles an action touches: the button and its result area.

use threadlens_core::{NodeId, SharedDocument};
use threadlens_logging::lens_warn;

/// A clickable control with a text label and an enabled state.
pub trait Control {
    fn is_attached(&self) -> bool;
    fn is_disabled(&self) -> bool;
    fn set_disabled(&self, disabled: bool);
    fn label(&self) -> String;
    fn set_label(&self, label: &str);
}

/// Where an action's output is shown.
pub trait ResultSurface {
    fn is_attached(&self) -> bool;
    /// Replaces the content with plain text.
    fn set_text(&self, text: &str);
    /// Replaces the content with already-sanitized markup.
    fn set_html(&self, html: &str);
    fn clear(&self) {
        self.set_text("");
    }
}

/// A `<button>`-like element in a shared document. Disabled state is the
/// `disabled` attribute, the label is the element text.
#[derive(Debug, Clone)]
pub struct DomControl {
    document: SharedDocument,
    node: NodeId,
}

impl DomControl {
    pub fn new(document: SharedDocument, node: NodeId) -> Self {
        Self { document, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl Control for DomControl {
    fn is_attached(&self) -> bool {
        self.document
            .try_borrow()
            .is_ok_and(|doc| doc.is_attached(self.node))
    }

    fn is_disabled(&self) -> bool {
        self.document
            .try_borrow()
            .is_ok_and(|doc| doc.has_attr(self.node, "disabled"))
    }

    fn set_disabled(&self, disabled: bool) {
        let value = disabled.then_some("");
        match self.document.try_borrow_mut() {
            Ok(mut doc) => {
                if let Err(err) = doc.set_attr(self.node, "disabled", value) {
                    lens_warn!("Could not toggle control {:?}: {}", self.node, err);
                }
            }
            Err(_) => lens_warn!("Document busy, control {:?} not toggled", self.node),
        }
    }

    fn label(&self) -> String {
        self.document
            .try_borrow()
            .ok()
            .and_then(|doc| doc.text(self.node))
            .unwrap_or_default()
    }

    fn set_label(&self, label: &str) {
        match self.document.try_borrow_mut() {
            Ok(mut doc) => {
                if let Err(err) = doc.set_text(self.node, label) {
                    lens_warn!("Could not relabel control {:?}: {}", self.node, err);
                }
            }
            Err(_) => lens_warn!("Document busy, control {:?} not relabelled", self.node),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DomSurface {
    document: SharedDocument,
    node: NodeId,
}

impl DomSurface {
    pub fn new(document: SharedDocument, node: NodeId) -> Self {
        Self { document, node }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn inner_html(&self) -> String {
        self.document
            .try_borrow()
            .ok()
            .and_then(|doc| doc.inner_html(self.node))
            .unwrap_or_default()
    }

    pub fn text(&self) -> String {
        self.document
            .try_borrow()
            .ok()
            .and_then(|doc| doc.text(self.node))
            .unwrap_or_default()
    }
}

impl ResultSurface for DomSurface {
    fn is_attached(&self) -> bool {
        self.document
            .try_borrow()
            .is_ok_and(|doc| doc.is_attached(self.node))
    }

    fn set_text(&self, text: &str) {
        match self.document.try_borrow_mut() {
            Ok(mut doc) => {
                if let Err(err) = doc.set_text(self.node, text) {
                    lens_warn!("Could not write to surface {:?}: {}", self.node, err);
                }
            }
            Err(_) => lens_warn!("Document busy, surface {:?} not updated", self.node),
        }
    }

    fn set_html(&self, html: &str) {
        match self.document.try_borrow_mut() {
            Ok(mut doc) => {
                if let Err(err) = doc.set_inner_html(self.node, html) {
                    lens_warn!("Could not write to surface {:?}: {}", self.node, err);
                }
            }
            Err(_) => lens_warn!("Document busy, surface {:?} not updated", self.node),
        }
    }
}
