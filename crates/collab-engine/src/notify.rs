/// Change notification boundary
///
/// The engine's only obligation is a well-formed event per apply and per
/// presence change. Delivery is fire-and-forget; a slow or disconnected
/// subscriber must never stall a document mutation.
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::{CollaboratorPresence, DocumentId, Operation, UserId};

/// Self-contained event payload fanned out to other participants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentEvent {
    OperationApplied {
        document_id: DocumentId,
        operation: Operation,
        new_version: u64,
    },

    PresenceChanged {
        document_id: DocumentId,
        presence: CollaboratorPresence,
    },

    CollaboratorLeft {
        document_id: DocumentId,
        user_id: UserId,
    },

    SnapshotCreated {
        document_id: DocumentId,
        version: u64,
    },
}

impl DocumentEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            DocumentEvent::OperationApplied { document_id, .. }
            | DocumentEvent::PresenceChanged { document_id, .. }
            | DocumentEvent::CollaboratorLeft { document_id, .. }
            | DocumentEvent::SnapshotCreated { document_id, .. } => document_id,
        }
    }
}

/// Transport-facing side of the fan-out. `publish` must not block and must
/// not fail the caller.
pub trait ChangeNotifier: Send + Sync {
    fn publish(&self, event: DocumentEvent);
}

/// Fan-out over a tokio broadcast channel. Receivers that fall behind drop
/// old events rather than applying backpressure to the apply path.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<DocumentEvent>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.tx.subscribe()
    }
}

impl ChangeNotifier for BroadcastNotifier {
    fn publish(&self, event: DocumentEvent) {
        // No receivers is fine; events are best effort
        let _ = self.tx.send(event);
    }
}

/// Notifier that drops everything, for tests and headless embedding
pub struct NullNotifier;

impl ChangeNotifier for NullNotifier {
    fn publish(&self, _event: DocumentEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::OperationKind;

    fn event(doc: &str) -> DocumentEvent {
        DocumentEvent::OperationApplied {
            document_id: DocumentId::from(doc),
            operation: Operation::new(
                UserId::new(),
                0,
                OperationKind::Insert {
                    position: 0,
                    content: "x".to_string(),
                },
            ),
            new_version: 1,
        }
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let notifier = BroadcastNotifier::new(16);
        let mut rx = notifier.subscribe();

        notifier.publish(event("doc"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.document_id(), &DocumentId::from("doc"));
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let notifier = BroadcastNotifier::new(16);
        notifier.publish(event("doc"));
    }

    #[tokio::test]
    async fn event_payloads_serialize_with_type_tags() {
        let json = serde_json::to_value(event("doc")).unwrap();
        assert_eq!(json["type"], "operation_applied");
        assert_eq!(json["document_id"], "doc");
        assert_eq!(json["new_version"], 1);
    }
}
