//! Record shapes and paths shared through the synchronized store.
//!
//! Both the room synchronizer and the call negotiator read and write these
//! records, and so does any other client of the same room. Keys are
//! camelCase on the wire; absent optional fields are omitted rather than
//! written as null, since a null write deletes the node.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// Store paths for rooms and calls.
pub mod paths {
    use super::CandidateSide;

    /// Collection holding every call record, keyed by call id.
    pub const CALLS: &str = "calls";

    pub fn room(room_id: &str) -> String {
        format!("rooms/{room_id}")
    }

    pub fn users(room_id: &str) -> String {
        format!("rooms/{room_id}/users")
    }

    pub fn user(room_id: &str, participant_id: &str) -> String {
        format!("rooms/{room_id}/users/{participant_id}")
    }

    pub fn user_field(room_id: &str, participant_id: &str, field: &str) -> String {
        format!("rooms/{room_id}/users/{participant_id}/{field}")
    }

    pub fn messages(room_id: &str) -> String {
        format!("rooms/{room_id}/messages")
    }

    pub fn reaction(room_id: &str, message_id: &str, participant_id: &str) -> String {
        format!("rooms/{room_id}/messages/{message_id}/reactions/{participant_id}")
    }

    pub fn call(call_id: &str) -> String {
        format!("{CALLS}/{call_id}")
    }

    pub fn candidates(call_id: &str, side: CandidateSide) -> String {
        format!("{CALLS}/{call_id}/{}", side.field())
    }
}

/// Field names written individually rather than as part of a whole record.
pub mod fields {
    pub const IS_TYPING: &str = "isTyping";
    pub const STATUS: &str = "status";
    pub const ANSWER: &str = "answer";
}

/// Key of the placeholder object the store swaps for its own clock.
const SERVER_VALUE_KEY: &str = ".sv";

/// Placeholder resolved to the store's clock (epoch millis) when written.
pub fn server_timestamp() -> Value {
    json!({ SERVER_VALUE_KEY: "timestamp" })
}

pub fn is_server_timestamp(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|map| map.len() == 1 && map.get(SERVER_VALUE_KEY) == Some(&json!("timestamp")))
}

// ---------------------------------------------------------------------------
// Room records
// ---------------------------------------------------------------------------

/// A member of a room as stored under `rooms/{room}/users/{id}`.
///
/// Records stay behind after a participant goes offline; only `is_online`
/// and `last_seen_at` change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Participant {
    pub id: String,
    pub display_name: String,
    pub is_online: bool,
    pub is_typing: bool,
    pub last_seen_at: i64,
}

/// Full presence record for a participant, stamped with the store clock.
///
/// Used both for the join write and for the on-disconnect hook, so the two
/// always agree on shape.
pub fn presence_record(participant_id: &str, display_name: &str, online: bool) -> Value {
    json!({
        "id": participant_id,
        "displayName": display_name,
        "isOnline": online,
        "isTyping": false,
        "lastSeenAt": server_timestamp(),
    })
}

/// What a message carries besides its text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
}

/// A chat message as stored under `rooms/{room}/messages/{id}`.
///
/// The id is the record's key and is not repeated inside the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default)]
    pub content: String,
    pub timestamp: i64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Participant id to emoji. One reaction per participant.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub reactions: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Call records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Pending,
    Active,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// An SDP offer or answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

/// An ICE candidate exactly as the media layer reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u32>,
}

/// Which side of a call published a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateSide {
    /// Written by the caller.
    Offer,
    /// Written by the callee.
    Answer,
}

impl CandidateSide {
    pub fn field(self) -> &'static str {
        match self {
            Self::Offer => "offerCandidates",
            Self::Answer => "answerCandidates",
        }
    }
}

/// Signaling record for one call, stored under `calls/{id}`.
///
/// Candidate collections are append-only and keyed by push keys, so
/// iterating them in key order replays them in the order they were added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    #[serde(default)]
    pub id: String,
    pub room_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub status: CallStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub offer_candidates: BTreeMap<String, IceCandidate>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub answer_candidates: BTreeMap<String, IceCandidate>,
    #[serde(default)]
    pub created_at: i64,
}

impl CallRecord {
    /// Parse a stored record, taking the id from its key.
    ///
    /// Returns `None` for absent or unreadable records.
    pub fn from_value(call_id: &str, value: &Value) -> Option<Self> {
        if value.is_null() {
            return None;
        }
        let mut record: Self = serde_json::from_value(value.clone()).ok()?;
        record.id = call_id.to_string();
        Some(record)
    }

    /// Candidates published by the other side of the call.
    pub fn remote_candidates(&self, local: CandidateSide) -> &BTreeMap<String, IceCandidate> {
        match local {
            CandidateSide::Offer => &self.answer_candidates,
            CandidateSide::Answer => &self.offer_candidates,
        }
    }
}
