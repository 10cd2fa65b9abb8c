//! Building `RoomSnapshot`s from raw room subtrees.

use serde_json::Value;
use tracing::warn;

use crate::protocol::{MessageRecord, Participant};

use super::types::{Message, RoomSnapshot};

pub(crate) fn build_snapshot(room_id: &str, room: &Value) -> RoomSnapshot {
    RoomSnapshot {
        room_id: room_id.to_string(),
        participants: parse_participants(room_id, room.get("users")),
        messages: parse_messages(room_id, room.get("messages")),
    }
}

/// Ids of participants whose record says they are online.
pub(crate) fn online_ids(users: &Value) -> Vec<String> {
    parse_participants("", Some(users))
        .into_iter()
        .filter(|p| p.is_online)
        .map(|p| p.id)
        .collect()
}

fn parse_participants(room_id: &str, users: Option<&Value>) -> Vec<Participant> {
    let Some(users) = users.and_then(Value::as_object) else {
        return Vec::new();
    };
    users
        .iter()
        .filter_map(|(key, value)| {
            match serde_json::from_value::<Participant>(value.clone()) {
                Ok(mut participant) => {
                    if participant.id.is_empty() {
                        participant.id = key.clone();
                    }
                    Some(participant)
                }
                Err(e) => {
                    warn!(room_id, key = %key, error = %e, "Skipping unreadable participant record");
                    None
                }
            }
        })
        .collect()
}

fn parse_messages(room_id: &str, messages: Option<&Value>) -> Vec<Message> {
    let Some(messages) = messages.and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut parsed: Vec<Message> = messages
        .iter()
        .filter_map(|(key, value)| {
            match serde_json::from_value::<MessageRecord>(value.clone()) {
                Ok(record) => Some(Message::from_record(key, record)),
                Err(e) => {
                    warn!(room_id, key = %key, error = %e, "Skipping unreadable message record");
                    None
                }
            }
        })
        .collect();
    parsed.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    parsed
}
