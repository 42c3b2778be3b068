//! Threadlens engine: context gathering, providers and action execution.
mod chat;
mod config;
mod context;
mod decode;
mod fetch;
mod instructions;
mod orchestrator;
mod persist;
mod render;
mod search;
mod secrets;
mod types;
mod ui;

pub use chat::{ChatError, ChatOptions, ChatProvider, ChatSettings, GeminiProvider};
pub use config::{ConfigError, ThreadlensConfig};
pub use context::{
    html_to_prompt_text, select_media_urls, ContextCollector, ContextError, ContextSupplier,
    ImageCandidate, MAX_MEDIA_ITEMS, MIN_MEDIA_DIMENSION,
};
pub use decode::{decode_text, DecodedText};
pub use fetch::{FetchSettings, Fetcher, ReqwestFetcher};
pub use instructions::StandardInstructions;
pub use orchestrator::{
    ActionBinding, ActionError, ActionTask, InstructionResolver, OptionsBuilder, Orchestrator,
    FAILURE_MESSAGE, WORKING_LABEL,
};
pub use persist::write_atomic;
pub use render::{
    markdown_to_html, render_result_html, rounded_millis, sanitize_html, MarkdownRenderer,
    Renderer, BLOCKED_ELEMENTS,
};
pub use search::{
    build_search_query, format_search_results, normalize_result_url, parse_primary_results,
    SearchAugmenter, SearchOptions, SearchProvider, SearchSettings, DEFAULT_QUERY_LENGTH,
    DEFAULT_SEARCH_LIMIT,
};
pub use secrets::{
    FileSecretStore, MemorySecretStore, SecretError, SecretPrompt, SecretStore, SecretVault,
};
pub use types::{
    ActionContext, ActionKind, ActionOptions, ActionRequest, ChatReply, FailureKind, FetchError,
    FetchMetadata, FetchOutput, MediaItem, PromptMode, RunOutcome, SearchResult,
};
pub use ui::{Control, DomControl, DomSurface, ResultSurface};
