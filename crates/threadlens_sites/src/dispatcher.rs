use std::rc::Rc;

use threadlens_logging::{lens_debug, lens_info};
use url::Url;

use crate::integration::PageIntegration;
use crate::reddit::RedditIntegration;

/// The integrations compiled in, in priority order.
pub fn default_integrations() -> Vec<Rc<dyn PageIntegration>> {
    vec![Rc::new(RedditIntegration::new())]
}

/// First integration whose `should_activate` accepts `url`.
pub fn select_integration(
    integrations: &[Rc<dyn PageIntegration>],
    url: &Url,
) -> Option<Rc<dyn PageIntegration>> {
    let selected = integrations
        .iter()
        .find(|integration| integration.should_activate(url))
        .cloned();
    match &selected {
        Some(integration) => lens_info!("Using {} integration for {}", integration.name(), url),
        None => lens_debug!("No integration for {}", url),
    }
    selected
}
