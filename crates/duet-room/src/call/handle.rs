//! Public handle for the call negotiator.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::identity::Identity;
use crate::media::MediaTransport;
use crate::protocol::paths;
use crate::store::SharedStore;

use super::actor::{CallActor, CallCommand, Envelope};
use super::types::{CallConfig, CallError, CallEvent, CallState};

// ---------------------------------------------------------------------------
// CallNegotiator
// ---------------------------------------------------------------------------

/// Handle for placing, answering and ending one-to-one calls in a room.
///
/// Every method queues a command for the background negotiator task and
/// returns once the task has handled it. Long-running steps (waiting on
/// the permission prompt, waiting for the peer) continue in the background
/// and show up in the state stream and the event channel.
///
/// Dropping the handle stops the task, ending any call in flight.
pub struct CallNegotiator {
    command_tx: mpsc::Sender<Envelope>,
    state_rx: watch::Receiver<CallState>,
    task: JoinHandle<()>,
}

impl CallNegotiator {
    /// Start listening for calls in `room_id`.
    ///
    /// Returns `(negotiator, event_receiver)`.
    pub async fn spawn(
        store: Arc<dyn SharedStore>,
        media: Arc<dyn MediaTransport>,
        identity: Identity,
        room_id: &str,
        config: CallConfig,
    ) -> Result<(Self, mpsc::Receiver<CallEvent>), CallError> {
        let calls = store
            .watch(paths::CALLS)
            .await
            .map_err(|e| CallError::SignalingReadFailed(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(256);
        let (command_tx, command_rx) = mpsc::channel(64);
        let (state_tx, state_rx) = watch::channel(CallState::default());

        let (actor, internal_rx) = CallActor::new(
            store,
            media,
            identity,
            room_id.to_string(),
            config,
            state_tx,
            event_tx,
        );
        let task = tokio::spawn(actor.run(command_rx, calls, internal_rx));

        let negotiator = Self {
            command_tx,
            state_rx,
            task,
        };
        Ok((negotiator, event_rx))
    }

    /// Call `callee_id`. Ignored while another call is in flight.
    pub async fn start_call(&self, callee_id: &str) -> Result<(), CallError> {
        self.send(CallCommand::Start {
            callee_id: callee_id.to_string(),
        })
        .await
    }

    /// Answer the call stored under `call_id`.
    pub async fn answer_call(&self, call_id: &str) -> Result<(), CallError> {
        self.send(CallCommand::Answer {
            call_id: call_id.to_string(),
        })
        .await
    }

    /// End the current call, or dismiss a ringing one. A no-op when idle.
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.send(CallCommand::End).await
    }

    pub async fn toggle_mute(&self) -> Result<(), CallError> {
        self.send(CallCommand::ToggleMute).await
    }

    pub async fn toggle_camera(&self) -> Result<(), CallError> {
        self.send(CallCommand::ToggleCamera).await
    }

    pub async fn toggle_minimize(&self) -> Result<(), CallError> {
        self.send(CallCommand::ToggleMinimize).await
    }

    /// Current call state.
    pub fn state(&self) -> CallState {
        self.state_rx.borrow().clone()
    }

    /// Receiver marked changed on every published state.
    pub fn subscribe(&self) -> watch::Receiver<CallState> {
        self.state_rx.clone()
    }

    /// Stop the negotiator and wait for it to finish tearing down.
    pub async fn shutdown(self) {
        let Self {
            command_tx, task, ..
        } = self;
        drop(command_tx);
        let _ = task.await;
    }

    async fn send(&self, command: CallCommand) -> Result<(), CallError> {
        let (done, done_rx) = oneshot::channel();
        self.command_tx
            .send(Envelope { command, done })
            .await
            .map_err(|_| CallError::NegotiatorClosed)?;
        done_rx.await.map_err(|_| CallError::NegotiatorClosed)
    }
}
