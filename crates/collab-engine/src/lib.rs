/// Real-time collaborative document editing engine
/// Operational transformation core with presence tracking and conflict resolution
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod operation;
pub use operation::*;

mod transform;
pub use transform::*;

mod document;
pub use document::*;

mod store;
pub use store::*;

mod presence;
pub use presence::*;

mod conflict;
pub use conflict::*;

mod notify;
pub use notify::*;

#[derive(Debug, Error)]
pub enum CollabError {
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("operation failed: {0}")]
    OperationFailed(String),

    #[error("document store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, CollabError>;

/// User identifier in a collaborative document
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub uuid::Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Short form for logs and auto-generated display names
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Document key. Client-chosen, any non-empty string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Policy constants for the engine. These are tunables, not invariants.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single document store round trip during apply
    pub store_timeout: std::time::Duration,

    /// Presence entries older than this are excluded from active listings
    pub presence_active_window: std::time::Duration,

    /// Presence entries older than this are removed by the sweeper
    pub presence_remove_after: std::time::Duration,

    /// How often the background presence sweep runs
    pub sweep_interval: std::time::Duration,

    /// How many trailing operations a document read returns for resync
    pub recent_operations_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store_timeout: std::time::Duration::from_secs(10),
            presence_active_window: std::time::Duration::from_secs(300),
            presence_remove_after: std::time::Duration::from_secs(1800),
            sweep_interval: std::time::Duration::from_secs(300),
            recent_operations_window: 50,
        }
    }
}
