//! Multi-participant room scenarios over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::timeout;

use super::*;
use crate::identity::Identity;
use crate::protocol::{paths, MessageKind};
use crate::store::{MemoryConnection, MemoryStore};

const WAIT: Duration = Duration::from_secs(2);

async fn join_as(store: &MemoryStore, room_id: &str, identity: Identity) -> (RoomSession, MemoryConnection) {
    let conn = store.connect();
    let session = RoomSession::join(Arc::new(conn.clone()), room_id, identity)
        .await
        .unwrap();
    (session, conn)
}

async fn join(store: &MemoryStore, room_id: &str, name: &str) -> (RoomSession, MemoryConnection) {
    join_as(store, room_id, Identity::generate(name)).await
}

async fn wait_until(
    session: &RoomSession,
    ready: impl FnMut(&RoomSnapshot) -> bool,
) -> RoomSnapshot {
    let mut rx = session.subscribe();
    let snapshot = timeout(WAIT, rx.wait_for(ready))
        .await
        .expect("timed out waiting for snapshot")
        .expect("snapshot stream closed");
    RoomSnapshot::clone(&snapshot)
}

fn user_record(store: &MemoryStore, room_id: &str, session: &RoomSession) -> Value {
    store.read(&paths::user(room_id, &session.identity().participant_id))
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_participants_see_each_other_and_messages() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let (bob, _b) = join(&store, "R1", "Bob").await;

    let outcome = alice.send_text("hi").await.unwrap();
    assert!(matches!(outcome, SendOutcome::Sent { .. }));

    let seen = wait_until(&bob, |s| s.online_count() == 2 && !s.messages.is_empty()).await;
    let message = &seen.messages[0];
    assert_eq!(message.content, "hi");
    assert_eq!(message.sender_id, alice.identity().participant_id);
    assert_eq!(message.sender_name, "Alice");
    assert_eq!(message.kind, MessageKind::Text);
    assert_eq!(
        seen.other_participant(&bob.identity().participant_id).unwrap().display_name,
        "Alice"
    );
}

#[tokio::test]
async fn snapshot_is_ready_right_after_join() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let snapshot = alice.snapshot();
    assert_eq!(snapshot.room_id, "R1");
    assert_eq!(snapshot.online_count(), 1);
    assert!(snapshot.participant(&alice.identity().participant_id).is_some());
}

#[tokio::test]
async fn third_participant_is_rejected_without_writing() {
    let store = MemoryStore::new();
    let (_alice, _a) = join(&store, "R1", "Alice").await;
    let (_bob, _b) = join(&store, "R1", "Bob").await;

    let carol = Identity::generate("Carol");
    let conn = store.connect();
    let err = RoomSession::join(Arc::new(conn), "R1", carol.clone())
        .await
        .err()
        .unwrap();

    assert!(matches!(err, RoomError::RoomFull { ref room_id } if room_id == "R1"));
    assert_eq!(
        store.read(&paths::user("R1", &carol.participant_id)),
        Value::Null
    );
}

#[tokio::test]
async fn returning_participant_is_admitted_to_full_room() {
    let store = MemoryStore::new();
    let alice = Identity::generate("Alice");
    let (_first, _a) = join_as(&store, "R1", alice.clone()).await;
    let (_bob, _b) = join(&store, "R1", "Bob").await;

    let (again, _a2) = join_as(&store, "R1", alice).await;
    assert_eq!(again.snapshot().online_count(), 2);
}

#[tokio::test]
async fn offline_members_do_not_count_toward_capacity() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    alice.leave().await.unwrap();

    let (_bob, _b) = join(&store, "R1", "Bob").await;
    let (carol, _c) = join(&store, "R1", "Carol").await;

    let snapshot = carol.snapshot();
    assert_eq!(snapshot.participants.len(), 3);
    assert_eq!(snapshot.online_count(), 2);
}

#[tokio::test]
async fn leave_and_lost_connection_write_the_same_record() {
    let store = MemoryStore::new();
    let (left, _a) = join(&store, "R1", "Alice").await;
    let (lost, lost_conn) = join(&store, "R2", "Alice").await;

    let left_id = left.identity().participant_id.clone();
    let lost_id = lost.identity().participant_id.clone();
    left.leave().await.unwrap();
    lost_conn.drop_connection();
    drop(lost);

    let mut left_record = store.read(&paths::user("R1", &left_id));
    let mut lost_record = store.read(&paths::user("R2", &lost_id));
    for (record, id) in [(&mut left_record, &left_id), (&mut lost_record, &lost_id)] {
        assert!(record["lastSeenAt"].is_i64());
        assert_eq!(record["id"], json!(id));
        let map = record.as_object_mut().unwrap();
        map.remove("lastSeenAt");
        map.remove("id");
    }
    assert_eq!(left_record, lost_record);
    assert_eq!(left_record["isOnline"], json!(false));
}

#[tokio::test]
async fn peer_sees_departure() {
    let store = MemoryStore::new();
    let (alice, alice_conn) = join(&store, "R1", "Alice").await;
    let (bob, _b) = join(&store, "R1", "Bob").await;
    let alice_id = alice.identity().participant_id.clone();

    alice_conn.drop_connection();

    let seen = wait_until(&bob, |s| {
        s.participant(&alice_id).is_some_and(|p| !p.is_online)
    })
    .await;
    assert_eq!(seen.online_count(), 1);
}

#[tokio::test]
async fn subscription_closes_after_leave() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let mut rx = alice.subscribe();
    alice.leave().await.unwrap();

    let closed = timeout(WAIT, async {
        while rx.changed().await.is_ok() {}
    })
    .await;
    assert!(closed.is_ok());
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[tokio::test]
async fn blank_message_is_rejected() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;

    assert_eq!(alice.send_text("   \n").await.unwrap(), SendOutcome::Rejected);
    assert_eq!(store.read(&paths::messages("R1")), Value::Null);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let (bob, _b) = join(&store, "R1", "Bob").await;

    for i in 0..5 {
        let sender = if i % 2 == 0 { &alice } else { &bob };
        sender.send_text(&format!("m{i}")).await.unwrap();
    }

    let seen = wait_until(&alice, |s| s.messages.len() == 5).await;
    let contents: Vec<_> = seen.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
}

#[tokio::test]
async fn second_reaction_replaces_first() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let (bob, _b) = join(&store, "R1", "Bob").await;

    let SendOutcome::Sent { message_id } = alice.send_text("hello").await.unwrap() else {
        panic!("message was rejected");
    };
    bob.add_reaction(&message_id, "👍").await.unwrap();
    bob.add_reaction(&message_id, "❤️").await.unwrap();

    let bob_id = bob.identity().participant_id.clone();
    let seen = wait_until(&alice, |s| {
        s.message(&message_id)
            .is_some_and(|m| m.reactions.get(&bob_id).map(String::as_str) == Some("❤️"))
    })
    .await;
    assert_eq!(seen.message(&message_id).unwrap().reactions.len(), 1);
}

struct FakeUploader {
    fail: bool,
}

#[async_trait]
impl Uploader for FakeUploader {
    async fn upload(&self, room_id: &str, attachment: &Attachment) -> Result<String, UploadError> {
        if self.fail {
            return Err(UploadError::Failed {
                file_name: attachment.file_name.clone(),
                reason: "quota exceeded".into(),
            });
        }
        Ok(format!("https://files.test/{}", attachment.storage_key(room_id, 1)))
    }
}

#[tokio::test]
async fn attachments_become_image_or_file_messages() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let uploader = FakeUploader { fail: false };

    let image = Attachment {
        file_name: "cat.png".into(),
        mime_type: "image/png".into(),
        bytes: vec![0; 4],
    };
    let doc = Attachment {
        file_name: "notes.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: vec![0; 4],
    };
    alice.send_attachment(&uploader, image).await.unwrap();
    alice.send_attachment(&uploader, doc).await.unwrap();

    let seen = wait_until(&alice, |s| s.messages.len() == 2).await;
    assert_eq!(seen.messages[0].kind, MessageKind::Image);
    assert_eq!(seen.messages[0].file_name.as_deref(), Some("cat.png"));
    assert_eq!(
        seen.messages[0].file_url.as_deref(),
        Some("https://files.test/files/R1/1_cat.png")
    );
    assert_eq!(seen.messages[1].kind, MessageKind::File);
}

#[tokio::test]
async fn failed_upload_sends_nothing() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let attachment = Attachment {
        file_name: "cat.png".into(),
        mime_type: "image/png".into(),
        bytes: Vec::new(),
    };

    let err = alice
        .send_attachment(&FakeUploader { fail: true }, attachment)
        .await
        .unwrap_err();
    assert!(matches!(err, RoomError::Upload(_)));
    assert_eq!(store.read(&paths::messages("R1")), Value::Null);
}

#[tokio::test]
async fn send_after_lost_connection_is_a_store_error() {
    let store = MemoryStore::new();
    let (alice, conn) = join(&store, "R1", "Alice").await;
    conn.drop_connection();

    let err = alice.send_text("hi").await.unwrap_err();
    assert!(matches!(err, RoomError::Store(_)));
}

// ---------------------------------------------------------------------------
// Typing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn peer_sees_typing_flag() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let (bob, _b) = join(&store, "R1", "Bob").await;
    let bob_id = bob.identity().participant_id.clone();

    alice.set_typing(true).await.unwrap();
    let seen = wait_until(&bob, |s| s.typing_peers(&bob_id).len() == 1).await;
    assert_eq!(seen.typing_peers(&bob_id)[0].display_name, "Alice");

    alice.set_typing(false).await.unwrap();
    wait_until(&bob, |s| s.typing_peers(&bob_id).is_empty()).await;
}

#[tokio::test]
async fn typing_flag_drops_after_idle_timeout() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let indicator = alice.typing_indicator(Duration::from_millis(100));
    let alice_id = alice.identity().participant_id.clone();
    let is_typing = move |s: &RoomSnapshot| s.participant(&alice_id).is_some_and(|p| p.is_typing);

    indicator.input_changed("h");
    wait_until(&alice, is_typing.clone()).await;
    wait_until(&alice, |s| !is_typing(s)).await;
}

#[tokio::test]
async fn typing_flag_drops_on_send() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let indicator = alice.typing_indicator(Duration::from_secs(60));
    let alice_id = alice.identity().participant_id.clone();
    let is_typing = move |s: &RoomSnapshot| s.participant(&alice_id).is_some_and(|p| p.is_typing);

    indicator.input_changed("hello");
    wait_until(&alice, is_typing.clone()).await;

    indicator.message_sent();
    wait_until(&alice, |s| !is_typing(s)).await;
}

#[tokio::test]
async fn blank_input_does_not_raise_typing_flag() {
    let store = MemoryStore::new();
    let (alice, _a) = join(&store, "R1", "Alice").await;
    let indicator = alice.typing_indicator(Duration::from_millis(50));

    indicator.input_changed("   ");
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(user_record(&store, "R1", &alice)["isTyping"], json!(false));
}
