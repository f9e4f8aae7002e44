/// WebSocket event stream per document
/// Forwards applied operations and presence changes to connected clients;
/// inbound messages are treated as activity pings
use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use collab_engine::{ChangeNotifier, DocumentEvent, DocumentId, PresenceActivity, UserId};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub user_id: Option<UserId>,
    pub display_name: Option<String>,
}

pub async fn events_handler(
    ws: WebSocketUpgrade,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Response {
    let document_id = DocumentId::from(id);
    ws.on_upgrade(move |socket| handle_socket(socket, state, document_id, query))
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    document_id: DocumentId,
    query: EventsQuery,
) {
    let user_id = query.user_id.unwrap_or_default();
    info!(
        "event stream opened: document={}, user={}",
        document_id, user_id
    );

    // Announce the viewer to everyone else
    state.manager.report_presence(
        &document_id,
        user_id,
        PresenceActivity {
            display_name: query.display_name,
            ..PresenceActivity::default()
        },
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut events = state.notifier.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if event.document_id() != &document_id {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if ws_tx.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("failed to serialize event: {}", e),
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(
                        "event stream for {} lagged, skipped {} events",
                        document_id, skipped
                    );
                }
                Err(RecvError::Closed) => break,
            },

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    // Inbound activity pings keep presence fresh
                    match serde_json::from_str::<PresenceActivity>(&text) {
                        Ok(activity) => {
                            state.manager.report_presence(&document_id, user_id, activity);
                        }
                        Err(e) => debug!("ignoring unparseable client message: {}", e),
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if ws_tx.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("event stream error: {}", e);
                    break;
                }
            },
        }
    }

    // The viewer is gone; drop them from presence and tell the others
    state.manager.presence().update(
        &document_id,
        user_id,
        PresenceActivity {
            status: Some(collab_engine::PresenceStatus::Offline),
            ..PresenceActivity::default()
        },
    );
    state.notifier.publish(DocumentEvent::CollaboratorLeft {
        document_id: document_id.clone(),
        user_id,
    });
    info!(
        "event stream closed: document={}, user={}",
        document_id, user_id
    );
}
