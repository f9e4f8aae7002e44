//! Collaborative document editing server
//! REST + WebSocket surface over the collab-engine core

mod api;
mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use collab_engine::{
    spawn_sweeper, AllowAll, BroadcastNotifier, DocumentManager, EngineConfig, MemoryStore,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<DocumentManager>,
    pub notifier: Arc<BroadcastNotifier>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "collab_server=debug,collab_engine=debug".to_string()),
        )
        .init();

    let config = EngineConfig::default();
    let notifier = Arc::new(BroadcastNotifier::new(1024));
    let manager = Arc::new(DocumentManager::new(
        config.clone(),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
        Arc::new(AllowAll),
    ));

    // Periodic presence sweep, independent of request handling
    let _sweeper = spawn_sweeper(
        manager.presence(),
        config.sweep_interval,
        config.presence_remove_after,
    );

    let state = AppState { manager, notifier };

    let app = Router::new()
        .route("/api/documents/:id", get(api::get_document))
        .route("/api/documents/:id/operations", post(api::submit_operation))
        .route("/api/documents/:id/presence", post(api::report_presence))
        .route("/api/documents/:id/snapshots", post(api::create_snapshot))
        .route("/api/documents/:id/events", get(ws::events_handler))
        // CORS for local development
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr =
        std::env::var("COLLAB_SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:4100".to_string());
    info!("Collaboration server listening on http://{}", addr);
    info!("  GET  /api/documents/:id             - Read document + collaborators");
    info!("  POST /api/documents/:id/operations  - Submit an edit");
    info!("  POST /api/documents/:id/presence    - Report activity");
    info!("  POST /api/documents/:id/snapshots   - Create a snapshot");
    info!("  GET  /api/documents/:id/events      - WebSocket event stream");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
