/// REST endpoints for document editing
/// Operation submission, document reads, presence reports, and snapshots
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use collab_engine::{
    CollabError, DocumentId, DocumentSnapshot, DocumentView, Operation, OperationId,
    OperationKind, PresenceActivity, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::AppState;

/// API error type
pub enum ApiError {
    Engine(CollabError),
    Internal(String),
}

impl From<CollabError> for ApiError {
    fn from(e: CollabError) -> Self {
        Self::Engine(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Engine(CollabError::PermissionDenied(m)) => (StatusCode::FORBIDDEN, m),
            ApiError::Engine(CollabError::OperationFailed(m)) => (StatusCode::CONFLICT, m),
            ApiError::Engine(CollabError::StoreUnavailable(m)) => {
                (StatusCode::SERVICE_UNAVAILABLE, m)
            }
            ApiError::Engine(CollabError::SerializationError(m)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, m)
            }
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Body of POST /api/documents/:id/operations
#[derive(Debug, Deserialize)]
pub struct OperationRequest {
    pub author_id: UserId,

    /// Version the edit was authored against. Defaults to the current
    /// version, meaning "apply as is, nothing concurrent".
    pub document_version: Option<u64>,

    #[serde(flatten)]
    pub kind: OperationKind,
}

#[derive(Debug, Serialize)]
pub struct OperationResponse {
    pub operation_id: OperationId,
    pub document_version: u64,
    pub transformed: bool,
}

/// POST /api/documents/:id/operations - Submit one edit
pub async fn submit_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<OperationRequest>,
) -> Result<Json<OperationResponse>, ApiError> {
    let document_id = DocumentId::from(id);

    let base_version = match req.document_version {
        Some(v) => v,
        None => state.manager.read_view(&document_id).await?.version,
    };
    let operation = Operation::new(req.author_id, base_version, req.kind);

    // Run to completion on a detached task so a client disconnect cannot
    // cancel an edit mid-apply
    let manager = state.manager.clone();
    let doc = document_id.clone();
    let outcome = tokio::spawn(async move { manager.apply(&doc, operation).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok(Json(OperationResponse {
        operation_id: outcome.operation.id,
        document_version: outcome.new_version,
        transformed: outcome.transformed,
    }))
}

/// GET /api/documents/:id - Current content, collaborators, recent history
pub async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    let view = state.manager.read_view(&DocumentId::from(id)).await?;
    Ok(Json(view))
}

/// Body of POST /api/documents/:id/presence
#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    pub user_id: UserId,

    #[serde(flatten)]
    pub activity: PresenceActivity,
}

/// POST /api/documents/:id/presence - Activity ping
pub async fn report_presence(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PresenceRequest>,
) -> Json<serde_json::Value> {
    let changed = state
        .manager
        .report_presence(&DocumentId::from(id), req.user_id, req.activity);
    Json(json!({ "acknowledged": true, "changed": changed }))
}

/// Body of POST /api/documents/:id/snapshots
#[derive(Debug, Deserialize)]
pub struct SnapshotRequest {
    pub author_id: UserId,

    #[serde(default)]
    pub message: String,
}

/// POST /api/documents/:id/snapshots - Persist a point-in-time copy
pub async fn create_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotRequest>,
) -> Result<Json<DocumentSnapshot>, ApiError> {
    let snapshot = state
        .manager
        .create_snapshot(&DocumentId::from(id), req.author_id, req.message)
        .await?;
    Ok(Json(snapshot))
}
