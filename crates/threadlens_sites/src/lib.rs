//! Site integrations: finding posts on a page, decorating them with action
//! panels and wiring the panels to the engine.

mod article;
mod dispatcher;
mod integration;
mod reddit;
mod session;
mod ui_builder;

pub use article::ArticleIntegration;
pub use dispatcher::{default_integrations, select_integration};
pub use integration::{
    resolve_url, watch_items, Bindings, IntegrationError, ItemContext, ItemHandle, ItemMetadata, PageContext,
    PageIntegration, ATTACHED_MARKER,
};
pub use reddit::{subreddit_from_url, RedditIntegration};
pub use session::{PageSession, SessionServices};
pub use ui_builder::{
    action_button_markup, build_action_panel, container_markup, panel_markup, ActionSlot, ItemUi,
    SlotUi, BUTTON_CLASS, PANEL_CLASS, TOOLBAR_CLASS,
};
