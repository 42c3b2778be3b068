use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A user-triggered AI operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Tldr,
    Answer,
    FactCheck,
    AnalyzeUser,
    Custom(String),
}

impl ActionKind {
    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Tldr => "tldr",
            ActionKind::Answer => "answer",
            ActionKind::FactCheck => "fact-check",
            ActionKind::AnalyzeUser => "analyze-user",
            ActionKind::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "tldr" => ActionKind::Tldr,
            "answer" => ActionKind::Answer,
            "fact-check" => ActionKind::FactCheck,
            "analyze-user" => ActionKind::AnalyzeUser,
            other => ActionKind::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fetched, base64-encoded media attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub mime_type: String,
    pub base64: String,
    pub source_url: String,
}

/// Everything an action's prompt is built from. Rebuilt on every invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionContext {
    pub primary_text: String,
    pub media: Vec<MediaItem>,
    pub transcript: Option<String>,
    pub formatted: String,
}

/// Prompt framing for the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptMode {
    #[default]
    Answer,
    FactCheck,
    Summary,
}

impl PromptMode {
    /// Line placed ahead of the web results so the model knows how to use them.
    pub fn search_guidance(self) -> &'static str {
        match self {
            PromptMode::Answer => {
                "Use the web results below to support your answer and cite the urls you rely on."
            }
            PromptMode::FactCheck => {
                "Check each claim against the web results below. Cite the url that supports or contradicts it."
            }
            PromptMode::Summary => "The web results below are background only. Do not summarize them.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOptions {
    pub use_web: bool,
    pub mode: PromptMode,
    pub search_query: Option<String>,
    pub search_limit: usize,
    pub search_provider: Option<String>,
    pub model: Option<String>,
}

impl Default for ActionOptions {
    fn default() -> Self {
        Self {
            use_web: false,
            mode: PromptMode::Answer,
            search_query: None,
            search_limit: 5,
            search_provider: None,
            model: None,
        }
    }
}

/// Immutable request assembled by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub instruction: String,
    pub context: ActionContext,
    pub options: ActionOptions,
}

impl ActionRequest {
    /// Instruction, a blank line, then the formatted context.
    pub fn prompt(&self) -> String {
        format!("{}\n\n{}", self.instruction, self.context.formatted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatReply {
    pub text: String,
    pub raw: serde_json::Value,
}

/// How an action run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The control was already busy; nothing happened.
    Skipped,
    Rendered { elapsed: Duration },
    Failed { reason: String },
    /// The result surface left the document before the run finished.
    Detached,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for FetchError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
