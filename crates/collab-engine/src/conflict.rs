/// Conflict escalation for edits transformation alone cannot merge
///
/// Resolution always produces an outcome and never fails, so a best-effort
/// background sweep can call it unconditionally.
use serde::{Deserialize, Serialize};

use crate::{DocumentId, Operation};

/// Unique conflict identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub uuid::Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

/// How conflicting operations get reduced to one outcome.
///
/// Callers must not assume last-write-wins is the only variant; future
/// strategies attach here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    LastWriteWins,
}

/// Record of one escalation, kept for audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictResolution {
    pub conflict_id: ConflictId,
    pub document_id: DocumentId,

    /// Every operation that took part, winners and losers alike
    pub conflicting_operations: Vec<Operation>,

    pub strategy: ResolutionStrategy,

    /// The winner. `None` only for an empty conflict set.
    pub resolved_operation: Option<Operation>,

    pub resolved_at: chrono::DateTime<chrono::Utc>,
}

pub struct ConflictResolver {
    strategy: ResolutionStrategy,
}

impl ConflictResolver {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self { strategy }
    }

    /// Reduce a set of conflicting operations to a single winner.
    ///
    /// A single operation wins trivially; an empty set resolves to no
    /// winner rather than failing.
    pub fn resolve(
        &self,
        document_id: &DocumentId,
        conflicting_operations: Vec<Operation>,
    ) -> ConflictResolution {
        let resolved_operation = match self.strategy {
            ResolutionStrategy::LastWriteWins => conflicting_operations
                .iter()
                .max_by_key(|op| (op.timestamp, op.author_id))
                .cloned(),
        };

        ConflictResolution {
            conflict_id: ConflictId::new(),
            document_id: document_id.clone(),
            conflicting_operations,
            strategy: self.strategy,
            resolved_operation,
            resolved_at: chrono::Utc::now(),
        }
    }
}
