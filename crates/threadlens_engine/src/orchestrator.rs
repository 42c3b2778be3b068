//! Runs one user-triggered action end to end: lease the control, gather
//! context, optionally search, ask the chat provider, render.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use threadlens_logging::{lens_debug, lens_error, lens_info};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatError, ChatOptions, ChatProvider};
use crate::context::{ContextError, ContextSupplier};
use crate::render::{MarkdownRenderer, Renderer};
use crate::search::{build_search_query, format_search_results, SearchAugmenter, DEFAULT_QUERY_LENGTH};
use crate::ui::{Control, ResultSurface};
use crate::{ActionContext, ActionKind, ActionOptions, ActionRequest, ChatReply, RunOutcome};

pub const WORKING_LABEL: &str = "Working…";
pub const FAILURE_MESSAGE: &str = "Sorry, something went wrong. Please try again.";

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("context: {0}")]
    Context(#[from] ContextError),
    #[error("chat: {0}")]
    Chat(#[from] ChatError),
}

pub trait InstructionResolver {
    fn instruction(&self, kind: &ActionKind) -> String;
}

impl<F> InstructionResolver for F
where
    F: Fn(&ActionKind) -> String,
{
    fn instruction(&self, kind: &ActionKind) -> String {
        (self)(kind)
    }
}

pub trait OptionsBuilder {
    fn options(&self, kind: &ActionKind, context: &ActionContext) -> ActionOptions;
}

impl<F> OptionsBuilder for F
where
    F: Fn(&ActionKind, &ActionContext) -> ActionOptions,
{
    fn options(&self, kind: &ActionKind, context: &ActionContext) -> ActionOptions {
        (self)(kind, context)
    }
}

/// Everything needed to run one action for one (control, surface) pair.
#[derive(Clone)]
pub struct ActionBinding {
    pub kind: ActionKind,
    pub control: Rc<dyn Control>,
    pub surface: Rc<dyn ResultSurface>,
    pub context: Rc<dyn ContextSupplier>,
    pub instructions: Rc<dyn InstructionResolver>,
    pub options: Rc<dyn OptionsBuilder>,
    pub renderer: Option<Rc<dyn Renderer>>,
}

impl ActionBinding {
    pub fn new(
        kind: ActionKind,
        control: Rc<dyn Control>,
        surface: Rc<dyn ResultSurface>,
        context: Rc<dyn ContextSupplier>,
        instructions: Rc<dyn InstructionResolver>,
        options: Rc<dyn OptionsBuilder>,
    ) -> Self {
        Self {
            kind,
            control,
            surface,
            context,
            instructions,
            options,
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Rc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }
}

/// Holds a control disabled with the working label; the original label and
/// enabled state come back on drop, including when the run is cancelled.
struct ControlLease<'a> {
    control: &'a dyn Control,
    label: String,
}

impl<'a> ControlLease<'a> {
    fn acquire(control: &'a dyn Control) -> Self {
        let label = control.label();
        control.set_disabled(true);
        control.set_label(WORKING_LABEL);
        Self { control, label }
    }
}

impl Drop for ControlLease<'_> {
    fn drop(&mut self) {
        if self.control.is_attached() {
            self.control.set_label(&self.label);
            self.control.set_disabled(false);
        }
    }
}

/// A spawned action. Must be polled from inside a `LocalSet`.
pub struct ActionTask {
    token: CancellationToken,
    handle: JoinHandle<RunOutcome>,
}

impl ActionTask {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> RunOutcome {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => RunOutcome::Cancelled,
            Err(err) => RunOutcome::Failed {
                reason: err.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    chat: Arc<dyn ChatProvider>,
    search: Option<SearchAugmenter>,
    renderer: Rc<dyn Renderer>,
}

impl Orchestrator {
    pub fn new(chat: Arc<dyn ChatProvider>) -> Self {
        Self {
            chat,
            search: None,
            renderer: Rc::new(MarkdownRenderer),
        }
    }

    pub fn with_search(mut self, search: SearchAugmenter) -> Self {
        self.search = Some(search);
        self
    }

    /// Replaces the renderer used by bindings that do not bring their own.
    pub fn with_renderer(mut self, renderer: Rc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub async fn execute(&self, binding: &ActionBinding) -> RunOutcome {
        let control = binding.control.as_ref();
        let surface = binding.surface.as_ref();
        if control.is_disabled() {
            lens_debug!("{} already running, ignoring activation", binding.kind);
            return RunOutcome::Skipped;
        }
        if !control.is_attached() {
            return RunOutcome::Detached;
        }

        let _lease = ControlLease::acquire(control);
        if surface.is_attached() {
            surface.clear();
        }

        match self.run(binding).await {
            Ok((reply, elapsed)) => {
                if !surface.is_attached() {
                    lens_debug!("Dropping {} result for detached surface", binding.kind);
                    return RunOutcome::Detached;
                }
                let renderer = binding.renderer.as_ref().unwrap_or(&self.renderer);
                renderer.render(surface, &reply.text, elapsed);
                lens_info!("{} rendered in {:?}", binding.kind, elapsed);
                RunOutcome::Rendered { elapsed }
            }
            Err(err) => {
                lens_error!("{} failed: {}", binding.kind, err);
                if !surface.is_attached() {
                    return RunOutcome::Detached;
                }
                surface.set_text(FAILURE_MESSAGE);
                RunOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Runs `execute` as a local task that can be cancelled through the
    /// returned handle.
    pub fn spawn(&self, binding: ActionBinding) -> ActionTask {
        self.spawn_with_token(binding, CancellationToken::new())
    }

    /// Like [`Orchestrator::spawn`], stopping when `token` is cancelled. Pass
    /// a child token to cancel many tasks through one parent.
    pub fn spawn_with_token(&self, binding: ActionBinding, token: CancellationToken) -> ActionTask {
        let cancelled = token.clone();
        let orchestrator = self.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::select! {
                outcome = orchestrator.execute(&binding) => outcome,
                _ = cancelled.cancelled() => {
                    lens_debug!("{} cancelled", binding.kind);
                    RunOutcome::Cancelled
                }
            }
        });
        ActionTask { token, handle }
    }

    async fn run(&self, binding: &ActionBinding) -> Result<(ChatReply, Duration), ActionError> {
        let context = binding.context.supply().await?;
        let instruction = binding.instructions.instruction(&binding.kind);
        let options = binding.options.options(&binding.kind, &context);
        let request = ActionRequest {
            kind: binding.kind.clone(),
            instruction,
            context,
            options,
        };

        let started = Instant::now();
        let reply = self.dispatch(&request).await?;
        Ok((reply, started.elapsed()))
    }

    async fn dispatch(&self, request: &ActionRequest) -> Result<ChatReply, ChatError> {
        let mut prompt = request.prompt();
        if request.options.use_web {
            let section = self.search_section(request).await;
            if !section.is_empty() {
                prompt.push_str("\n\n");
                prompt.push_str(request.options.mode.search_guidance());
                prompt.push('\n');
                prompt.push_str(&section);
            }
        }
        let chat_options = ChatOptions {
            model: request.options.model.clone(),
        };
        self.chat
            .chat(&prompt, &request.context.media, &chat_options)
            .await
    }

    async fn search_section(&self, request: &ActionRequest) -> String {
        let Some(search) = &self.search else {
            lens_debug!("Web search requested but no search augmenter configured");
            return String::new();
        };
        let query = request
            .options
            .search_query
            .clone()
            .unwrap_or_else(|| build_search_query("", &request.context.primary_text, DEFAULT_QUERY_LENGTH));
        let mut options = search.default_options().with_limit(request.options.search_limit);
        if let Some(provider) = &request.options.search_provider {
            options = options.with_provider(provider.clone());
        }
        let results = search.search(&query, &options).await;
        format_search_results(&results)
    }
}
