/// Collaborator presence tracking
/// Ephemeral, best-effort state showing who is viewing a document and where
/// their cursor is. Never a correctness boundary; nothing here fails.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{DocumentId, UserId};

/// Fixed palette cycled through as collaborators first appear. Assignment is
/// stable for the life of the tracker, not across restarts.
pub const PRESENCE_PALETTE: [&str; 8] = [
    "#E06C75", "#61AFEF", "#98C379", "#C678DD", "#E5C07B", "#56B6C2", "#D19A66", "#BE5046",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Active,
    Idle,
    Away,
    Offline,
}

/// Selection as a half-open character range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

/// One user's state in one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorPresence {
    pub user_id: UserId,
    pub display_name: String,
    pub status: PresenceStatus,
    pub cursor_position: Option<usize>,
    pub selection_range: Option<SelectionRange>,
    pub color: String,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

/// One activity report. Absent fields leave the current value in place.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresenceActivity {
    pub display_name: Option<String>,
    pub status: Option<PresenceStatus>,
    pub cursor_position: Option<usize>,
    pub selection_range: Option<SelectionRange>,
}

struct Inner {
    entries: HashMap<(DocumentId, UserId), CollaboratorPresence>,
    colors_assigned: usize,
}

/// Tracks who is present in which document
pub struct PresenceTracker {
    active_window: Duration,
    inner: RwLock<Inner>,
}

impl PresenceTracker {
    pub fn new(active_window: Duration) -> Self {
        Self {
            active_window,
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                colors_assigned: 0,
            }),
        }
    }

    /// Upsert a presence from an activity report. Returns whether anything
    /// observable changed, so callers can suppress no-op notifications.
    pub fn update(
        &self,
        document_id: &DocumentId,
        user_id: UserId,
        activity: PresenceActivity,
    ) -> bool {
        use std::collections::hash_map::Entry;

        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let now = chrono::Utc::now();

        match inner.entries.entry((document_id.clone(), user_id)) {
            Entry::Occupied(mut slot) => {
                let presence = slot.get_mut();
                let mut changed = false;
                if let Some(name) = activity.display_name {
                    if presence.display_name != name {
                        presence.display_name = name;
                        changed = true;
                    }
                }
                if let Some(status) = activity.status {
                    if presence.status != status {
                        presence.status = status;
                        changed = true;
                    }
                }
                if let Some(cursor) = activity.cursor_position {
                    if presence.cursor_position != Some(cursor) {
                        presence.cursor_position = Some(cursor);
                        changed = true;
                    }
                }
                if let Some(selection) = activity.selection_range {
                    if presence.selection_range != Some(selection) {
                        presence.selection_range = Some(selection);
                        changed = true;
                    }
                }
                presence.last_seen = now;
                changed
            }
            Entry::Vacant(slot) => {
                let color =
                    PRESENCE_PALETTE[inner.colors_assigned % PRESENCE_PALETTE.len()].to_string();
                inner.colors_assigned += 1;

                slot.insert(CollaboratorPresence {
                    user_id,
                    display_name: activity
                        .display_name
                        .unwrap_or_else(|| format!("User-{}", user_id.short())),
                    status: activity.status.unwrap_or(PresenceStatus::Active),
                    cursor_position: activity.cursor_position,
                    selection_range: activity.selection_range,
                    color,
                    last_seen: now,
                });
                true
            }
        }
    }

    pub fn get(&self, document_id: &DocumentId, user_id: &UserId) -> Option<CollaboratorPresence> {
        self.inner
            .read()
            .entries
            .get(&(document_id.clone(), *user_id))
            .cloned()
    }

    /// Presences seen within the active window, optionally for one document
    pub fn list_active(&self, document_id: Option<&DocumentId>) -> Vec<CollaboratorPresence> {
        let now = chrono::Utc::now();
        let window = chrono::Duration::from_std(self.active_window)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        self.inner
            .read()
            .entries
            .iter()
            .filter(|((doc, _), presence)| {
                document_id.map(|d| d == doc).unwrap_or(true)
                    && presence.status != PresenceStatus::Offline
                    && now - presence.last_seen <= window
            })
            .map(|(_, presence)| presence.clone())
            .collect()
    }

    /// Remove presences not seen for longer than the threshold. Returns how
    /// many were removed.
    pub fn sweep(&self, inactive_after: Duration) -> usize {
        let now = chrono::Utc::now();
        let threshold = chrono::Duration::from_std(inactive_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(1800));

        let mut inner = self.inner.write();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|_, presence| now - presence.last_seen <= threshold);
        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!("presence sweep removed {} stale entries", removed);
        }
        removed
    }
}

/// Periodic background sweep, independent of request handling
pub fn spawn_sweeper(
    tracker: Arc<PresenceTracker>,
    interval: Duration,
    inactive_after: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            tracker.sweep(inactive_after);
        }
    })
}
