//! One participant's membership in a room.

use std::sync::Arc;
use std::time::Duration;

use duet_common::now_millis;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::protocol::{fields, paths, presence_record, MessageRecord};
use crate::store::{SharedStore, StoreWatch};

use super::snapshot::{build_snapshot, online_ids};
use super::types::{
    MessageDraft, RoomError, RoomSnapshot, SendOutcome, MAX_ONLINE_PARTICIPANTS,
};
use super::typing::TypingIndicator;
use super::upload::{Attachment, Uploader};

// ---------------------------------------------------------------------------
// RoomSession
// ---------------------------------------------------------------------------

/// A joined room.
///
/// Holds the participant's presence and streams a fresh `RoomSnapshot`
/// whenever anything under the room changes. Dropping the session stops
/// the stream; presence is left to the store's on-disconnect hook.
pub struct RoomSession {
    store: Arc<dyn SharedStore>,
    room_id: String,
    identity: Identity,
    snapshot_rx: watch::Receiver<RoomSnapshot>,
    pump: JoinHandle<()>,
}

impl RoomSession {
    /// Join `room_id` as `identity`.
    ///
    /// Fails with `RoomFull` when two other participants are already
    /// online; nothing is written in that case. A participant whose record
    /// is already online (a reconnect) is let back in.
    ///
    /// The capacity check and the presence write are separate store calls,
    /// so two clients joining a one-seat room at the same instant can both
    /// get in.
    pub async fn join(
        store: Arc<dyn SharedStore>,
        room_id: &str,
        identity: Identity,
    ) -> Result<Self, RoomError> {
        let participant_id = identity.participant_id.as_str();
        let users = store.get(&paths::users(room_id)).await?;
        let online = online_ids(&users);
        let returning = online.iter().any(|id| id == participant_id);
        if online.len() >= MAX_ONLINE_PARTICIPANTS && !returning {
            warn!(room_id, participant_id, online = online.len(), "Join rejected, room is full");
            return Err(RoomError::RoomFull {
                room_id: room_id.to_string(),
            });
        }

        let user_path = paths::user(room_id, participant_id);
        store
            .set(&user_path, presence_record(participant_id, &identity.display_name, true))
            .await?;
        store
            .on_disconnect_set(
                &user_path,
                presence_record(participant_id, &identity.display_name, false),
            )
            .await?;

        let mut room_watch = store.watch(&paths::room(room_id)).await?;
        let initial = match room_watch.changed().await {
            Some(value) => build_snapshot(room_id, &value),
            None => RoomSnapshot::empty(room_id),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let pump = tokio::spawn(snapshot_pump(room_id.to_string(), room_watch, snapshot_tx));

        info!(room_id, participant_id, returning, "Joined room");
        Ok(Self {
            store,
            room_id: room_id.to_string(),
            identity,
            snapshot_rx,
            pump,
        })
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Latest snapshot of the room.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Receiver that is marked changed on every new snapshot. It reports
    /// closed once the session leaves or is dropped.
    pub fn subscribe(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshot_rx.clone()
    }

    /// Append a message stamped with the local clock.
    ///
    /// Blank drafts are skipped and reported as `Rejected`.
    pub async fn send_message(&self, draft: MessageDraft) -> Result<SendOutcome, RoomError> {
        if draft.is_blank() {
            debug!(room_id = %self.room_id, "Skipping blank message");
            return Ok(SendOutcome::Rejected);
        }

        let record = MessageRecord {
            sender_id: self.identity.participant_id.clone(),
            sender_name: self.identity.display_name.clone(),
            content: draft.content,
            timestamp: now_millis(),
            kind: draft.kind,
            file_url: draft.file_url,
            file_name: draft.file_name,
            reactions: Default::default(),
        };
        let message_id = self
            .store
            .push(&paths::messages(&self.room_id), serde_json::to_value(&record)?)
            .await?;

        debug!(room_id = %self.room_id, message_id = %message_id, kind = ?record.kind, "Message sent");
        Ok(SendOutcome::Sent { message_id })
    }

    /// Send plain text.
    pub async fn send_text(&self, content: &str) -> Result<SendOutcome, RoomError> {
        self.send_message(MessageDraft::text(content)).await
    }

    /// Upload `attachment` and send it as an image or file message.
    pub async fn send_attachment(
        &self,
        uploader: &dyn Uploader,
        attachment: Attachment,
    ) -> Result<SendOutcome, RoomError> {
        let url = uploader.upload(&self.room_id, &attachment).await?;
        info!(room_id = %self.room_id, file_name = %attachment.file_name, "Attachment uploaded");
        let kind = attachment.message_kind();
        self.send_message(MessageDraft::attachment(kind, url, attachment.file_name))
            .await
    }

    /// Set this participant's typing flag.
    pub async fn set_typing(&self, typing: bool) -> Result<(), RoomError> {
        self.store
            .set(&self.typing_path(), Value::Bool(typing))
            .await?;
        Ok(())
    }

    /// Debounced typing flag for this participant's composer.
    pub fn typing_indicator(&self, idle: Duration) -> TypingIndicator {
        TypingIndicator::spawn(Arc::clone(&self.store), self.typing_path(), idle)
    }

    /// React to a message, replacing any earlier reaction from this
    /// participant.
    pub async fn add_reaction(&self, message_id: &str, emoji: &str) -> Result<(), RoomError> {
        let path = paths::reaction(&self.room_id, message_id, &self.identity.participant_id);
        self.store.set(&path, Value::from(emoji)).await?;
        debug!(room_id = %self.room_id, message_id, emoji, "Reaction set");
        Ok(())
    }

    /// Mark this participant offline and stop the snapshot stream.
    ///
    /// The on-disconnect hook stays registered; when it fires later it
    /// writes the same offline record.
    pub async fn leave(self) -> Result<(), RoomError> {
        self.pump.abort();
        let participant_id = &self.identity.participant_id;
        self.store
            .set(
                &paths::user(&self.room_id, participant_id),
                presence_record(participant_id, &self.identity.display_name, false),
            )
            .await?;
        info!(room_id = %self.room_id, participant_id = %participant_id, "Left room");
        Ok(())
    }

    fn typing_path(&self) -> String {
        paths::user_field(&self.room_id, &self.identity.participant_id, fields::IS_TYPING)
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn snapshot_pump(
    room_id: String,
    mut room_watch: StoreWatch,
    snapshot_tx: watch::Sender<RoomSnapshot>,
) {
    while let Some(value) = room_watch.changed().await {
        let snapshot = build_snapshot(&room_id, &value);
        debug!(
            room_id = %room_id,
            participants = snapshot.participants.len(),
            messages = snapshot.messages.len(),
            "Room snapshot"
        );
        snapshot_tx.send_replace(snapshot);
    }
    info!(room_id = %room_id, "Room subscription ended");
}
