//! One page load: picks an integration, watches for items and runs the
//! actions bound to their controls.

use std::rc::Rc;
use std::sync::Arc;

use threadlens_core::{DiscoveryEngine, DiscoverySettings, NodeId, SharedDocument, Subscription};
use threadlens_engine::{
    ActionTask, ContextCollector, GeminiProvider, InstructionResolver, Orchestrator, RunOutcome,
    SearchAugmenter, SecretVault, StandardInstructions, ThreadlensConfig,
};
use threadlens_logging::{lens_debug, lens_info};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::dispatcher::select_integration;
use crate::integration::{watch_items, Bindings, IntegrationError, PageContext, PageIntegration};

/// The long-lived services a page session borrows.
#[derive(Clone)]
pub struct SessionServices {
    pub orchestrator: Orchestrator,
    pub collector: ContextCollector,
    pub instructions: Rc<dyn InstructionResolver>,
    pub discovery: DiscoverySettings,
}

impl SessionServices {
    pub fn new(orchestrator: Orchestrator, collector: ContextCollector) -> Self {
        Self {
            orchestrator,
            collector,
            instructions: Rc::new(StandardInstructions::new()),
            discovery: DiscoverySettings::default(),
        }
    }

    pub fn with_instructions(mut self, instructions: Rc<dyn InstructionResolver>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn with_discovery(mut self, settings: DiscoverySettings) -> Self {
        self.discovery = settings;
        self
    }

    /// Gemini chat with DuckDuckGo/Exa search, both reading keys from `vault`.
    pub fn from_config(config: &ThreadlensConfig, vault: SecretVault) -> Self {
        let chat = Arc::new(GeminiProvider::new(config.chat.clone(), vault.clone()));
        let search = SearchAugmenter::new(config.search.clone(), vault);
        let orchestrator = Orchestrator::new(chat).with_search(search);
        Self::new(orchestrator, ContextCollector::from_settings(&config.fetch))
            .with_discovery(config.discovery)
    }
}

pub struct PageSession {
    page: PageContext,
    integration: Rc<dyn PageIntegration>,
    subscription: Option<Subscription>,
    /// Parent of every spawned action's token.
    actions: CancellationToken,
}

impl PageSession {
    /// Returns `Ok(None)` when no integration wants `url`.
    pub fn start(
        url: &str,
        document: SharedDocument,
        services: &SessionServices,
        integrations: &[Rc<dyn PageIntegration>],
    ) -> Result<Option<Self>, IntegrationError> {
        let url = Url::parse(url)?;
        let Some(integration) = select_integration(integrations, &url) else {
            return Ok(None);
        };

        let page = PageContext {
            url,
            discovery: DiscoveryEngine::with_settings(document.clone(), services.discovery),
            document,
            orchestrator: services.orchestrator.clone(),
            collector: services.collector.clone(),
            instructions: services.instructions.clone(),
            bindings: Bindings::default(),
        };
        integration.init(&page)?;
        let subscription = watch_items(integration.clone(), &page)?;
        lens_info!("{}: session started for {}", integration.name(), page.url);

        Ok(Some(Self {
            page,
            integration,
            subscription: Some(subscription),
            actions: CancellationToken::new(),
        }))
    }

    pub fn integration_name(&self) -> &'static str {
        self.integration.name()
    }

    pub fn page(&self) -> &PageContext {
        &self.page
    }

    pub fn discovery(&self) -> &DiscoveryEngine {
        &self.page.discovery
    }

    /// Drains pending mutations and decorates new items.
    pub fn tick(&self) -> usize {
        self.page.discovery.tick()
    }

    /// Watcher loop for [`tokio::task::spawn_local`].
    pub fn watch(&self) -> impl std::future::Future<Output = ()> + 'static {
        self.page.discovery.clone().watch()
    }

    pub fn binding_count(&self) -> usize {
        self.page.bindings.len()
    }

    /// Starts the action bound to `control` as a local task. Must be called
    /// inside a `LocalSet`.
    pub fn activate(&self, control: NodeId) -> Option<ActionTask> {
        let Some(binding) = self.page.bindings.get(control) else {
            lens_debug!("{}: no action bound to {:?}", self.integration.name(), control);
            return None;
        };
        Some(
            self.page
                .orchestrator
                .spawn_with_token(binding, self.actions.child_token()),
        )
    }

    /// Runs the action bound to `control` to completion.
    pub async fn run(&self, control: NodeId) -> Option<RunOutcome> {
        let binding = self.page.bindings.get(control)?;
        Some(self.page.orchestrator.execute(&binding).await)
    }

    /// Cancels running actions and stops discovery.
    pub fn shutdown(mut self) {
        self.actions.cancel();
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.page.discovery.disconnect_all();
        self.page.bindings.clear();
        self.integration.cleanup();
        lens_info!("{}: session closed", self.integration.name());
    }
}
