//! Local two-party run over the in-memory store and loopback media.
//!
//! Both participants share one `MemoryStore` through separate connections,
//! so everything the room and call layers do goes through the same store
//! paths a hosted backend would see.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use duet_common::{now_millis, DuetError};
use duet_config::DuetConfig;
use duet_room::{
    Attachment, CallEvent, CallNegotiator, CallPhase, CallState, Identity, IncomingCallPolicy,
    LoopbackMedia, MemoryStore, RoomError, RoomSession, RoomSnapshot, SendOutcome, SharedStore,
    UploadError, Uploader,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::settings;

/// Pretends to upload by handing back a `memory://` URL.
struct MemoryUploader;

#[async_trait]
impl Uploader for MemoryUploader {
    async fn upload(&self, room_id: &str, attachment: &Attachment) -> Result<String, UploadError> {
        Ok(format!(
            "memory://{}",
            attachment.storage_key(room_id, now_millis())
        ))
    }
}

fn room_err(e: RoomError) -> DuetError {
    DuetError::Room(e.to_string())
}

/// Wait until the watched value satisfies `done`, or fail after `limit`.
async fn wait_until<T, F>(
    rx: &mut watch::Receiver<T>,
    limit: Duration,
    what: &str,
    mut done: F,
) -> Result<T, DuetError>
where
    T: Clone,
    F: FnMut(&T) -> bool,
{
    match tokio::time::timeout(limit, rx.wait_for(|value| done(value))).await {
        Ok(Ok(value)) => Ok((*value).clone()),
        Ok(Err(_)) => Err(DuetError::Other(format!("{what}: publisher went away"))),
        Err(_) => Err(DuetError::Other(format!("{what}: timed out after {limit:?}"))),
    }
}

/// Answer the first ringing call when the callee prompts for it.
async fn answer_when_ringing(
    callee: &CallNegotiator,
    events: &mut mpsc::Receiver<CallEvent>,
    limit: Duration,
) -> Result<(), DuetError> {
    let ringing = async {
        while let Some(event) = events.recv().await {
            if let CallEvent::IncomingCall(incoming) = event {
                return Some(incoming);
            }
        }
        None
    };
    match tokio::time::timeout(limit, ringing).await {
        Ok(Some(incoming)) => {
            info!(call_id = %incoming.call_id, caller_id = %incoming.caller_id, "Answering call");
            callee
                .answer_call(&incoming.call_id)
                .await
                .map_err(|e| DuetError::Call(e.to_string()))
        }
        Ok(None) => Err(DuetError::Call("negotiator stopped before ringing".into())),
        Err(_) => Err(DuetError::Call("no incoming call".into())),
    }
}

fn print_log(label: &str, snapshot: &RoomSnapshot) {
    println!("[{label}] room {} ({} online)", snapshot.room_id, snapshot.online_count());
    for message in &snapshot.messages {
        let body = match (&message.file_name, &message.file_url) {
            (Some(name), Some(url)) => format!("{name} <{url}>"),
            _ => message.content.clone(),
        };
        let reactions: Vec<&str> = message.reactions.values().map(String::as_str).collect();
        println!(
            "  {}: {} {}",
            message.sender_name,
            body,
            reactions.join("")
        );
    }
}

fn print_call(label: &str, state: &CallState) {
    println!(
        "[{label}] call {:?} phase={:?} muted={} camera={} remote={}",
        state.call_id,
        state.phase,
        state.is_muted,
        state.is_camera_on,
        state
            .remote_stream
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("-"),
    );
}

pub async fn run(config: &DuetConfig, room_id: &str, step: Duration) -> Result<(), DuetError> {
    let store = MemoryStore::new();
    let conn_a = store.connect();
    let conn_b = store.connect();
    let store_a: Arc<dyn SharedStore> = Arc::new(conn_a.clone());
    let store_b: Arc<dyn SharedStore> = Arc::new(conn_b.clone());

    let alice = Identity::generate(&settings::display_name(config));
    let bob = Identity::generate("peer");
    let call_config = settings::call_config(config);
    info!(room_id, alice = %alice.participant_id, bob = %bob.participant_id, "Starting demo");

    // ----- Room -----

    let room_a = RoomSession::join(store_a.clone(), room_id, alice.clone())
        .await
        .map_err(room_err)?;
    let room_b = RoomSession::join(store_b.clone(), room_id, bob.clone())
        .await
        .map_err(room_err)?;

    let intruder_store: Arc<dyn SharedStore> = Arc::new(store.connect());
    match RoomSession::join(intruder_store, room_id, Identity::generate("third")).await {
        Err(RoomError::RoomFull { .. }) => println!("third participant turned away: room is full"),
        Err(e) => return Err(room_err(e)),
        Ok(_) => warn!(room_id, "Third participant was let in"),
    }

    let mut snapshots_a = room_a.subscribe();
    let mut snapshots_b = room_b.subscribe();
    wait_until(&mut snapshots_a, step, "peer joined", |s| s.online_count() == 2).await?;

    let typing = room_b.typing_indicator(settings::typing_idle(config));
    typing.input_changed("h");
    wait_until(&mut snapshots_a, step, "peer typing", |s| {
        !s.typing_peers(&alice.participant_id).is_empty()
    })
    .await?;
    println!("[{}] {} is typing...", alice.display_name, bob.display_name);

    let hello = match room_b.send_text("hi").await.map_err(room_err)? {
        SendOutcome::Sent { message_id } => message_id,
        SendOutcome::Rejected => return Err(DuetError::Room("message was rejected".into())),
    };
    typing.message_sent();

    if room_a.send_text("   ").await.map_err(room_err)? == SendOutcome::Rejected {
        debug!(room_id, "Blank message refused locally");
    }

    wait_until(&mut snapshots_a, step, "message delivered", |s| {
        s.message(&hello).is_some()
    })
    .await?;
    room_a.add_reaction(&hello, "👋").await.map_err(room_err)?;

    let attachment = Attachment {
        file_name: "notes.txt".into(),
        mime_type: "text/plain".into(),
        bytes: b"shared notes".to_vec(),
    };
    room_a
        .send_attachment(&MemoryUploader, attachment)
        .await
        .map_err(room_err)?;

    let seen_by_bob = wait_until(&mut snapshots_b, step, "log synced", |s| {
        s.messages.len() == 2 && s.message(&hello).is_some_and(|m| !m.reactions.is_empty())
    })
    .await?;
    print_log(&bob.display_name, &seen_by_bob);

    // ----- Call -----

    let media_a = Arc::new(LoopbackMedia::new("alice"));
    let media_b = Arc::new(LoopbackMedia::new("bob"));
    let (caller, _caller_events) = CallNegotiator::spawn(
        store_a.clone(),
        media_a.clone(),
        alice.clone(),
        room_id,
        call_config.clone(),
    )
    .await
    .map_err(|e| DuetError::Call(e.to_string()))?;
    let (callee, mut callee_events) = CallNegotiator::spawn(
        store_b.clone(),
        media_b.clone(),
        bob.clone(),
        room_id,
        call_config.clone(),
    )
    .await
    .map_err(|e| DuetError::Call(e.to_string()))?;

    let target = room_a
        .snapshot()
        .other_participant(&alice.participant_id)
        .map(|p| p.id.clone())
        .ok_or_else(|| DuetError::Room("nobody to call".into()))?;
    caller
        .start_call(&target)
        .await
        .map_err(|e| DuetError::Call(e.to_string()))?;

    if call_config.incoming_policy == IncomingCallPolicy::ManualPrompt {
        answer_when_ringing(&callee, &mut callee_events, step).await?;
    }

    let mut caller_state = caller.subscribe();
    let mut callee_state = callee.subscribe();
    let connected = |s: &CallState| s.phase == CallPhase::Active && s.remote_stream.is_some();
    let a = wait_until(&mut caller_state, step, "caller connected", connected).await?;
    let b = wait_until(&mut callee_state, step, "callee connected", connected).await?;
    print_call(&alice.display_name, &a);
    print_call(&bob.display_name, &b);

    caller
        .toggle_mute()
        .await
        .map_err(|e| DuetError::Call(e.to_string()))?;
    print_call(&alice.display_name, &caller.state());

    caller
        .end_call()
        .await
        .map_err(|e| DuetError::Call(e.to_string()))?;
    wait_until(&mut callee_state, step, "callee hung up", |s| s.phase.is_idle()).await?;
    println!(
        "call ended; live tracks: {} / {}",
        media_a.live_tracks(),
        media_b.live_tracks()
    );

    caller.shutdown().await;
    callee.shutdown().await;

    // ----- Departure -----

    conn_b.drop_connection();
    let after = wait_until(&mut snapshots_a, step, "peer went offline", |s| {
        s.online_count() == 1
    })
    .await?;
    println!(
        "[{}] {} left the room",
        alice.display_name, bob.display_name
    );
    print_log(&alice.display_name, &after);

    drop(room_b);
    room_a.leave().await.map_err(room_err)?;
    info!(room_id, "Demo finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use duet_config::IncomingPolicy;

    #[tokio::test]
    async fn demo_runs_with_auto_accept() {
        let config = DuetConfig::default();
        run(&config, "R1", Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn demo_runs_with_manual_prompt() {
        let mut config = DuetConfig::default();
        config.call.incoming_policy = IncomingPolicy::ManualPrompt;
        run(&config, "R2", Duration::from_secs(5)).await.unwrap();
    }

    #[tokio::test]
    async fn memory_uploader_returns_storage_url() {
        let attachment = Attachment {
            file_name: "a.png".into(),
            mime_type: "image/png".into(),
            bytes: vec![1, 2, 3],
        };
        let url = MemoryUploader.upload("R1", &attachment).await.unwrap();
        assert!(url.starts_with("memory://files/R1/"));
        assert!(url.ends_with("_a.png"));
    }
}
