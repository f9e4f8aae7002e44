/// Document edit operations
/// An operation describes a single text edit at a character position,
/// authored against a specific document version
use serde::{Deserialize, Serialize};

use crate::UserId;

/// Unique operation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub uuid::Uuid);

impl OperationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The edit itself. Positions and lengths are character offsets, not bytes.
///
/// `Retain` is never authored directly; it is what a delete degrades to when
/// concurrent deletes already removed everything it targeted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationKind {
    Insert {
        position: usize,
        content: String,
    },
    Delete {
        position: usize,
        length: usize,
    },
    Replace {
        position: usize,
        length: usize,
        content: String,
    },
    Retain,
}

impl OperationKind {
    pub fn is_retain(&self) -> bool {
        matches!(self, OperationKind::Retain)
    }

    pub fn position(&self) -> Option<usize> {
        match self {
            OperationKind::Insert { position, .. }
            | OperationKind::Delete { position, .. }
            | OperationKind::Replace { position, .. } => Some(*position),
            OperationKind::Retain => None,
        }
    }

    /// Apply this edit to a text buffer, returning the new text.
    ///
    /// Fails without side effects when the edit does not fit the buffer,
    /// which callers surface as an apply failure.
    pub fn apply(&self, text: &str) -> std::result::Result<String, String> {
        match self {
            OperationKind::Insert { position, content } => {
                let at = byte_offset(text, *position).ok_or_else(|| {
                    format!("insert position {} beyond document length", position)
                })?;
                let mut out = String::with_capacity(text.len() + content.len());
                out.push_str(&text[..at]);
                out.push_str(content);
                out.push_str(&text[at..]);
                Ok(out)
            }

            OperationKind::Delete { position, length } => {
                let (start, end) = span_offsets(text, *position, *length)?;
                let mut out = String::with_capacity(text.len() - (end - start));
                out.push_str(&text[..start]);
                out.push_str(&text[end..]);
                Ok(out)
            }

            OperationKind::Replace {
                position,
                length,
                content,
            } => {
                let (start, end) = span_offsets(text, *position, *length)?;
                let mut out = String::with_capacity(text.len() - (end - start) + content.len());
                out.push_str(&text[..start]);
                out.push_str(content);
                out.push_str(&text[end..]);
                Ok(out)
            }

            OperationKind::Retain => Ok(text.to_string()),
        }
    }
}

/// Byte offset of the given character position, valid for 0..=char_count.
fn byte_offset(text: &str, char_pos: usize) -> Option<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .nth(char_pos)
}

fn span_offsets(
    text: &str,
    position: usize,
    length: usize,
) -> std::result::Result<(usize, usize), String> {
    let start = byte_offset(text, position)
        .ok_or_else(|| format!("position {} beyond document length", position))?;
    let end = byte_offset(text, position + length).ok_or_else(|| {
        format!(
            "range {}..{} beyond document length",
            position,
            position + length
        )
    })?;
    Ok((start, end))
}

/// A single edit authored by one user
///
/// Immutable once created: transformation produces new values and never
/// mutates in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation ID
    pub id: OperationId,

    /// User who authored this operation
    pub author_id: UserId,

    /// The edit, with positions relative to the version the author saw
    pub kind: OperationKind,

    /// Authoring timestamp. Ordering key, tie-broken by author ID.
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Document version the author believed was current
    pub base_version: u64,
}

impl Operation {
    pub fn new(author_id: UserId, base_version: u64, kind: OperationKind) -> Self {
        Self {
            id: OperationId::new(),
            author_id,
            kind,
            timestamp: chrono::Utc::now(),
            base_version,
        }
    }

    /// Same operation rebased onto a new edit shape. Keeps identity fields.
    pub fn with_kind(&self, kind: OperationKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// Deterministic ordering used for transform folding and tie-breaks.
    /// Identical on every replica.
    pub fn precedes(&self, other: &Operation) -> bool {
        (self.timestamp, self.author_id) < (other.timestamp, other.author_id)
    }

    /// Where the author's cursor lands after this edit is applied
    pub fn cursor_after(&self) -> Option<usize> {
        match &self.kind {
            OperationKind::Insert { position, content }
            | OperationKind::Replace {
                position, content, ..
            } => Some(position + content.chars().count()),
            OperationKind::Delete { position, .. } => Some(*position),
            OperationKind::Retain => None,
        }
    }
}
