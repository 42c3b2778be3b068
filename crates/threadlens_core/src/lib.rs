//! Threadlens core: the mutable document model, pattern matching and the
//! content discovery engine. No network IO lives here.
mod discovery;
mod document;
mod matcher;

pub use discovery::{
    DiscoveryEngine, DiscoverySettings, MatchCallback, ObserveOptions, RescanPolicy, Subscription,
    SubscriptionId,
};
pub use document::{
    escape_attr, escape_text, Document, DocumentError, MutationRecord, ObserverId, SharedDocument,
};
pub use ego_tree::NodeId;
pub use matcher::{Pattern, PatternError};
