/// Document state ownership and the serialized apply path
///
/// One `DocumentState` per document ID, mutated only here. Applies for the
/// same document are serialized behind a per-document lock; different
/// documents proceed in parallel.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    transform, ChangeNotifier, CollabError, ConflictResolution, ConflictResolver, DocumentEvent,
    DocumentId, DocumentStore, EngineConfig, Operation, PresenceActivity, PresenceTracker,
    ResolutionStrategy, Result, UserId,
};

/// Authoritative state for one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentState {
    pub document_id: DocumentId,

    /// Current full text
    pub content: String,

    /// Incremented exactly once per successfully applied operation
    pub version: u64,

    pub last_modified: DateTime<Utc>,

    /// Append-only log of applied operations, in application order
    pub operations_history: Vec<Operation>,

    /// Operations whose transform could not place them; they wait here for
    /// conflict resolution and are never counted as applied
    pub pending_operations: Vec<Operation>,
}

impl DocumentState {
    pub fn new(document_id: DocumentId) -> Self {
        Self {
            document_id,
            content: String::new(),
            version: 0,
            last_modified: Utc::now(),
            operations_history: Vec::new(),
            pending_operations: Vec::new(),
        }
    }

    fn from_record(record: DocumentRecord, history: Vec<Operation>) -> Self {
        Self {
            document_id: record.document_id,
            content: record.content,
            version: record.version,
            last_modified: record.last_modified,
            operations_history: history,
            pending_operations: Vec::new(),
        }
    }

    /// Operations applied after the given version. Since the version counts
    /// applied operations, these are exactly `operations_history[base..]`.
    pub fn concurrent_since(&self, base_version: u64) -> &[Operation] {
        let start = (base_version as usize).min(self.operations_history.len());
        &self.operations_history[start..]
    }

    /// Trailing window of applied operations for client resynchronization
    pub fn recent_operations(&self, window: usize) -> &[Operation] {
        let start = self.operations_history.len().saturating_sub(window);
        &self.operations_history[start..]
    }

    /// Replay the full history from an empty document. The result must equal
    /// `content`; used for audit and tests.
    pub fn replay(&self) -> std::result::Result<String, String> {
        let mut text = String::new();
        for op in &self.operations_history {
            text = op.kind.apply(&text)?;
        }
        Ok(text)
    }
}

/// Persisted per-document record, without the operation log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: DocumentId,
    pub content: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
}

/// Point-in-time copy persisted for later restore or audit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub id: SnapshotId,
    pub document_id: DocumentId,
    pub content: String,
    pub version: u64,
    pub author_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Unique snapshot identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId(pub uuid::Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a successful apply
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    /// The operation as applied, after transformation
    pub operation: Operation,

    pub new_version: u64,

    /// Whether transformation changed the operation before it was applied
    pub transformed: bool,
}

/// Read view of a document plus the context a client needs to resync
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document_id: DocumentId,
    pub content: String,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub collaborators: Vec<crate::CollaboratorPresence>,
    pub recent_operations: Vec<Operation>,
}

/// Edit-rights check. The actual policy lives outside the engine.
#[async_trait]
pub trait PermissionPolicy: Send + Sync {
    async fn can_edit(&self, user: &UserId, document: &DocumentId) -> bool;
}

/// Default policy: everyone may edit everything
pub struct AllowAll;

#[async_trait]
impl PermissionPolicy for AllowAll {
    async fn can_edit(&self, _user: &UserId, _document: &DocumentId) -> bool {
        true
    }
}

/// Owns every document's state and serializes mutations to it
pub struct DocumentManager {
    config: EngineConfig,
    store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn ChangeNotifier>,
    policy: Arc<dyn PermissionPolicy>,
    presence: Arc<PresenceTracker>,
    resolver: ConflictResolver,
    documents: RwLock<HashMap<DocumentId, Arc<Mutex<DocumentState>>>>,
}

impl DocumentManager {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn ChangeNotifier>,
        policy: Arc<dyn PermissionPolicy>,
    ) -> Self {
        let presence = Arc::new(PresenceTracker::new(config.presence_active_window));
        Self {
            config,
            store,
            notifier,
            policy,
            presence,
            resolver: ConflictResolver::new(ResolutionStrategy::LastWriteWins),
            documents: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn presence(&self) -> Arc<PresenceTracker> {
        self.presence.clone()
    }

    /// Cached state for the document, loaded from the store on first access.
    /// A document absent from the store starts fresh at version 0.
    pub async fn get_or_create(&self, document_id: &DocumentId) -> Result<Arc<Mutex<DocumentState>>> {
        if let Some(entry) = self.documents.read().await.get(document_id) {
            return Ok(entry.clone());
        }

        // Load outside the registry lock; if two requests race, the first
        // insert wins and the duplicate load is discarded
        let loaded = self.load_state(document_id).await?;
        let mut documents = self.documents.write().await;
        let entry = documents
            .entry(document_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone();
        Ok(entry)
    }

    async fn load_state(&self, document_id: &DocumentId) -> Result<DocumentState> {
        let load = async {
            let record = self.store.load_document(document_id).await?;
            let history = match &record {
                Some(_) => self.store.load_operations(document_id).await?,
                None => Vec::new(),
            };
            Ok::<_, CollabError>((record, history))
        };

        let (record, history) = tokio::time::timeout(self.config.store_timeout, load)
            .await
            .map_err(|_| CollabError::StoreUnavailable("document load timed out".to_string()))??;

        Ok(match record {
            Some(record) => DocumentState::from_record(record, history),
            None => DocumentState::new(document_id.clone()),
        })
    }

    /// Transform, apply, and persist one operation.
    ///
    /// Either the whole apply-and-persist sequence commits, or in-memory
    /// state is left untouched and the error is surfaced. A rejected or
    /// failed operation is never recorded in the history.
    pub async fn apply(&self, document_id: &DocumentId, operation: Operation) -> Result<ApplyOutcome> {
        self.apply_inner(document_id, operation, true).await
    }

    async fn apply_inner(
        &self,
        document_id: &DocumentId,
        operation: Operation,
        queue_on_failure: bool,
    ) -> Result<ApplyOutcome> {
        if !self
            .policy
            .can_edit(&operation.author_id, document_id)
            .await
        {
            return Err(CollabError::PermissionDenied(format!(
                "user {} may not edit document {}",
                operation.author_id, document_id
            )));
        }

        let entry = self.get_or_create(document_id).await?;
        let mut state = entry.lock().await;

        let concurrent = state.concurrent_since(operation.base_version);
        let transformed = transform(&operation, concurrent);
        let was_transformed = transformed.kind != operation.kind;

        // Candidate content first; state is only committed after the store
        // accepted the write
        let new_content = match transformed.kind.apply(&state.content) {
            Ok(content) => content,
            Err(reason) => {
                warn!(
                    "operation {} does not fit document {} at version {}: {}",
                    operation.id, document_id, state.version, reason
                );
                if queue_on_failure {
                    state.pending_operations.push(operation);
                }
                return Err(CollabError::OperationFailed(reason));
            }
        };

        let new_version = state.version + 1;
        let now = Utc::now();
        let record = DocumentRecord {
            document_id: document_id.clone(),
            content: new_content.clone(),
            version: new_version,
            last_modified: now,
        };

        let persist = async {
            self.store.save_document(&record).await?;
            self.store.append_operation(document_id, &transformed).await
        };
        match tokio::time::timeout(self.config.store_timeout, persist).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(CollabError::StoreUnavailable(
                    "document save timed out".to_string(),
                ))
            }
        }

        state.content = new_content;
        state.version = new_version;
        state.last_modified = now;
        state.operations_history.push(transformed.clone());
        drop(state);

        debug!(
            "applied operation {} to document {} at version {}",
            transformed.id, document_id, new_version
        );

        // Best-effort side effects; neither may stall or fail the apply
        self.notifier.publish(DocumentEvent::OperationApplied {
            document_id: document_id.clone(),
            operation: transformed.clone(),
            new_version,
        });
        if let Some(cursor) = transformed.cursor_after() {
            self.report_presence(
                document_id,
                transformed.author_id,
                PresenceActivity {
                    cursor_position: Some(cursor),
                    ..PresenceActivity::default()
                },
            );
        }

        Ok(ApplyOutcome {
            operation: transformed,
            new_version,
            transformed: was_transformed,
        })
    }

    /// Record user activity on a document and fan out the change when
    /// anything observable moved. Never fails; presence is best effort.
    pub fn report_presence(
        &self,
        document_id: &DocumentId,
        user_id: UserId,
        activity: PresenceActivity,
    ) -> bool {
        let changed = self.presence.update(document_id, user_id, activity);
        if changed {
            if let Some(presence) = self.presence.get(document_id, &user_id) {
                self.notifier.publish(DocumentEvent::PresenceChanged {
                    document_id: document_id.clone(),
                    presence,
                });
            }
        }
        changed
    }

    /// Current content plus the context a client needs to resynchronize
    pub async fn read_view(&self, document_id: &DocumentId) -> Result<DocumentView> {
        let entry = self.get_or_create(document_id).await?;
        let state = entry.lock().await;
        Ok(DocumentView {
            document_id: document_id.clone(),
            content: state.content.clone(),
            version: state.version,
            last_modified: state.last_modified,
            collaborators: self.presence.list_active(Some(document_id)),
            recent_operations: state
                .recent_operations(self.config.recent_operations_window)
                .to_vec(),
        })
    }

    /// Persist a point-in-time copy of the document
    pub async fn create_snapshot(
        &self,
        document_id: &DocumentId,
        author_id: UserId,
        message: impl Into<String>,
    ) -> Result<DocumentSnapshot> {
        let entry = self.get_or_create(document_id).await?;
        let state = entry.lock().await;
        let snapshot = DocumentSnapshot {
            id: SnapshotId::new(),
            document_id: document_id.clone(),
            content: state.content.clone(),
            version: state.version,
            author_id,
            message: message.into(),
            created_at: Utc::now(),
        };
        drop(state);

        tokio::time::timeout(
            self.config.store_timeout,
            self.store.save_snapshot(&snapshot),
        )
        .await
        .map_err(|_| CollabError::StoreUnavailable("snapshot save timed out".to_string()))??;

        self.notifier.publish(DocumentEvent::SnapshotCreated {
            document_id: document_id.clone(),
            version: snapshot.version,
        });

        Ok(snapshot)
    }

    /// Escalate queued unplaceable operations to the conflict resolver.
    /// The winner is re-applied best effort; losers stay in the resolution
    /// record for audit. Returns `None` when nothing was queued.
    pub async fn resolve_pending(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<ConflictResolution>> {
        let entry = self.get_or_create(document_id).await?;
        let resolution = {
            let mut state = entry.lock().await;
            if state.pending_operations.is_empty() {
                return Ok(None);
            }
            let drained = std::mem::take(&mut state.pending_operations);
            self.resolver.resolve(document_id, drained)
        };

        if let Some(winner) = resolution.resolved_operation.clone() {
            if let Err(e) = self.apply_inner(document_id, winner, false).await {
                warn!(
                    "conflict winner for document {} still failed to apply: {}",
                    document_id, e
                );
            }
        }

        Ok(Some(resolution))
    }
}
