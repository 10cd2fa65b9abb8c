//! Room snapshot types, message drafts and errors.

use std::collections::BTreeMap;

use crate::protocol::{MessageKind, MessageRecord, Participant};
use crate::store::StoreError;

use super::upload::UploadError;

/// Online participants a room admits at once.
pub const MAX_ONLINE_PARTICIPANTS: usize = 2;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// A chat message together with its store key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub timestamp: i64,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub reactions: BTreeMap<String, String>,
}

impl Message {
    pub(crate) fn from_record(id: &str, record: MessageRecord) -> Self {
        Self {
            id: id.to_string(),
            sender_id: record.sender_id,
            sender_name: record.sender_name,
            content: record.content,
            timestamp: record.timestamp,
            kind: record.kind,
            file_url: record.file_url,
            file_name: record.file_name,
            reactions: record.reactions,
        }
    }
}

/// Immutable view of a room, rebuilt on every change.
///
/// Participants come in key order; messages are sorted by timestamp with
/// ties broken by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
}

impl RoomSnapshot {
    pub fn empty(room_id: &str) -> Self {
        Self {
            room_id: room_id.to_string(),
            ..Self::default()
        }
    }

    pub fn online_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_online).count()
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    /// The first participant other than `self_id`, online or not.
    pub fn other_participant(&self, self_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id != self_id)
    }

    /// Online participants other than `self_id` who are typing.
    pub fn typing_peers(&self, self_id: &str) -> Vec<&Participant> {
        self.participants
            .iter()
            .filter(|p| p.id != self_id && p.is_online && p.is_typing)
            .collect()
    }

    pub fn message(&self, message_id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }
}

// ---------------------------------------------------------------------------
// Sending
// ---------------------------------------------------------------------------

/// A message before it is stamped and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDraft {
    pub content: String,
    pub kind: MessageKind,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            file_url: None,
            file_name: None,
        }
    }

    pub fn attachment(kind: MessageKind, file_url: String, file_name: String) -> Self {
        Self {
            content: String::new(),
            kind,
            file_url: Some(file_url),
            file_name: Some(file_name),
        }
    }

    /// Nothing worth sending: whitespace-only text and no attachment.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty() && self.file_url.is_none()
    }
}

/// Result of a send that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { message_id: String },
    /// The draft was blank; nothing was written.
    Rejected,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("room {room_id} is full")]
    RoomFull { room_id: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("attachment upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str, online: bool, typing: bool) -> Participant {
        Participant {
            id: id.into(),
            display_name: id.to_uppercase(),
            is_online: online,
            is_typing: typing,
            last_seen_at: 0,
        }
    }

    #[test]
    fn blank_drafts() {
        assert!(MessageDraft::text("   \n\t").is_blank());
        assert!(!MessageDraft::text(" hi ").is_blank());
        let file = MessageDraft::attachment(MessageKind::File, "u".into(), "a.pdf".into());
        assert!(!file.is_blank());
    }

    #[test]
    fn snapshot_helpers() {
        let snapshot = RoomSnapshot {
            room_id: "R1".into(),
            participants: vec![
                participant("a", true, true),
                participant("b", true, true),
                participant("c", false, true),
            ],
            messages: Vec::new(),
        };
        assert_eq!(snapshot.online_count(), 2);
        assert_eq!(snapshot.other_participant("a").unwrap().id, "b");
        let typing: Vec<_> = snapshot.typing_peers("a").iter().map(|p| p.id.clone()).collect();
        assert_eq!(typing, vec!["b"]);
        assert!(snapshot.participant("z").is_none());
    }

    #[test]
    fn room_full_display() {
        let err = RoomError::RoomFull {
            room_id: "R1".into(),
        };
        assert_eq!(err.to_string(), "room R1 is full");
    }
}
