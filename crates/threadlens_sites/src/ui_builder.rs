//! Markup for the per-item action panel.

use std::fmt::Write as _;

use threadlens_core::{escape_attr, escape_text, Document, NodeId, Pattern};
use threadlens_engine::ActionKind;

use crate::IntegrationError;

pub const PANEL_CLASS: &str = "threadlens-content";
pub const TOOLBAR_CLASS: &str = "ai-toolbar";
pub const BUTTON_CLASS: &str = "ai-button";

/// One button plus the result container it writes into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSlot {
    pub kind: ActionKind,
    pub label: String,
    pub button_class: String,
    pub container_class: String,
}

impl ActionSlot {
    pub fn new(kind: ActionKind, label: &str, button_class: &str, container_class: &str) -> Self {
        Self {
            kind,
            label: label.to_string(),
            button_class: button_class.to_string(),
            container_class: container_class.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotUi {
    pub control: NodeId,
    pub surface: NodeId,
}

/// Node ids of a built panel, with `slots` in the order they were requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemUi {
    pub panel: NodeId,
    pub slots: Vec<(ActionKind, SlotUi)>,
}

pub fn container_markup(class: &str) -> String {
    format!(r#"<div class="{}"></div>"#, escape_attr(class))
}

pub fn action_button_markup(label: &str, class: &str) -> String {
    format!(
        r#"<button class="{BUTTON_CLASS} {}">{}</button>"#,
        escape_attr(class),
        escape_text(label)
    )
}

/// Result containers first, then a toolbar holding the buttons.
pub fn panel_markup(slots: &[ActionSlot]) -> String {
    let mut markup = format!(r#"<div class="{PANEL_CLASS}">"#);
    for slot in slots {
        markup.push_str(&container_markup(&slot.container_class));
    }
    let _ = write!(markup, r#"<div class="{TOOLBAR_CLASS}" style="margin-top: 8px;"> ✨"#);
    for slot in slots {
        markup.push_str(&action_button_markup(&slot.label, &slot.button_class));
    }
    markup.push_str("</div></div>");
    markup
}

/// Appends a panel to `host` and resolves every slot's button and container.
pub fn build_action_panel(
    document: &mut Document,
    host: NodeId,
    slots: &[ActionSlot],
) -> Result<ItemUi, IntegrationError> {
    let added = document.append_html(host, &panel_markup(slots))?;
    let panel = added
        .into_iter()
        .find(|id| document.element(*id).is_some())
        .ok_or_else(|| IntegrationError::MissingElement(PANEL_CLASS.to_string()))?;

    let mut resolved = Vec::with_capacity(slots.len());
    for slot in slots {
        let control = find_by_class(document, panel, &slot.button_class)?;
        let surface = find_by_class(document, panel, &slot.container_class)?;
        resolved.push((slot.kind.clone(), SlotUi { control, surface }));
    }
    Ok(ItemUi {
        panel,
        slots: resolved,
    })
}

fn find_by_class(document: &Document, scope: NodeId, class: &str) -> Result<NodeId, IntegrationError> {
    let pattern = Pattern::parse(&format!(".{class}"))?;
    document
        .first_within(scope, &pattern)
        .ok_or_else(|| IntegrationError::MissingElement(class.to_string()))
}
