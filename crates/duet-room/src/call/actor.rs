//! The negotiator's event loop.
//!
//! All call state lives on this task. It reacts to commands from the
//! `CallNegotiator` handle, to snapshots of the `calls` collection, and to
//! internal messages (media grants, peer session events). Internal
//! messages carry the attempt that produced them; anything from an attempt
//! that is no longer current is discarded.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use duet_common::now_millis;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::identity::Identity;
use crate::media::{
    LocalStream, MediaError, MediaTransport, PeerSession, SessionEvent, TrackKind,
};
use crate::protocol::{
    CallRecord, CallStatus, CandidateSide, IceCandidate, SessionDescription,
};
use crate::store::{SharedStore, StoreWatch};

use super::signaling;
use super::types::{
    CallConfig, CallError, CallEvent, CallPhase, CallRole, CallState, EndReason, IncomingCall,
    IncomingCallPolicy,
};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

pub(crate) enum CallCommand {
    Start { callee_id: String },
    Answer { call_id: String },
    End,
    ToggleMute,
    ToggleCamera,
    ToggleMinimize,
}

/// A command plus the channel acknowledging it was handled.
pub(crate) struct Envelope {
    pub(crate) command: CallCommand,
    pub(crate) done: oneshot::Sender<()>,
}

pub(crate) enum Internal {
    MediaReady {
        attempt: u64,
        result: Result<LocalStream, MediaError>,
    },
    Session {
        attempt: u64,
        event: SessionEvent,
    },
}

fn session_failed(e: MediaError) -> CallError {
    CallError::Session(e.to_string())
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// How often to look for expired calls.
fn expiry_tick(timeout: Duration) -> Duration {
    (timeout / 4).clamp(Duration::from_millis(20), Duration::from_secs(5))
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

// ---------------------------------------------------------------------------
// Live call
// ---------------------------------------------------------------------------

/// Resources and progress of the call in flight.
struct LiveCall {
    attempt: u64,
    role: CallRole,
    call_id: Option<String>,
    peer_id: String,
    local: Option<LocalStream>,
    session: Option<Arc<dyn PeerSession>>,
    /// The record is in the store: written by us, or the one being answered.
    record_exists: bool,
    remote_applied: bool,
    applied_candidates: HashSet<String>,
    created_at: Option<i64>,
}

impl LiveCall {
    fn new(attempt: u64, role: CallRole, call_id: Option<String>, peer_id: String) -> Self {
        Self {
            attempt,
            role,
            call_id,
            peer_id,
            local: None,
            session: None,
            record_exists: role == CallRole::Callee,
            remote_applied: false,
            applied_candidates: HashSet::new(),
            created_at: None,
        }
    }

    fn local_side(&self) -> CandidateSide {
        match self.role {
            CallRole::Caller => CandidateSide::Offer,
            CallRole::Callee => CandidateSide::Answer,
        }
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

pub(crate) struct CallActor {
    store: Arc<dyn SharedStore>,
    media: Arc<dyn MediaTransport>,
    identity: Identity,
    room_id: String,
    config: CallConfig,
    state: CallState,
    state_tx: watch::Sender<CallState>,
    event_tx: mpsc::Sender<CallEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    call: Option<LiveCall>,
    ringing: Option<IncomingCall>,
    /// Incoming records already acted on.
    seen_incoming: HashSet<String>,
    next_attempt: u64,
}

impl CallActor {
    pub(crate) fn new(
        store: Arc<dyn SharedStore>,
        media: Arc<dyn MediaTransport>,
        identity: Identity,
        room_id: String,
        config: CallConfig,
        state_tx: watch::Sender<CallState>,
        event_tx: mpsc::Sender<CallEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<Internal>) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let actor = Self {
            store,
            media,
            identity,
            room_id,
            config,
            state: CallState::default(),
            state_tx,
            event_tx,
            internal_tx,
            call: None,
            ringing: None,
            seen_incoming: HashSet::new(),
            next_attempt: 1,
        };
        (actor, internal_rx)
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Envelope>,
        mut calls: StoreWatch,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        let mut expiry = self.config.pending_timeout.map(|timeout| {
            let mut interval = tokio::time::interval(expiry_tick(timeout));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut calls_open = true;

        info!(
            participant_id = %self.identity.participant_id,
            room_id = %self.room_id,
            "Call negotiator started"
        );

        loop {
            tokio::select! {
                envelope = commands.recv() => {
                    let Some(Envelope { command, done }) = envelope else {
                        break;
                    };
                    self.handle_command(command).await;
                    let _ = done.send(());
                }
                snapshot = calls.changed(), if calls_open => match snapshot {
                    Some(value) => self.handle_calls(&value).await,
                    None => {
                        calls_open = false;
                        warn!(room_id = %self.room_id, "Call signaling subscription ended");
                        if self.call.is_some() {
                            self.fail(CallError::SignalingReadFailed(
                                "subscription to calls ended".to_string(),
                            ))
                            .await;
                        }
                    }
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
                _ = next_tick(&mut expiry) => self.check_expiry().await,
            }
        }

        self.teardown(EndReason::Local, true).await;
        info!(participant_id = %self.identity.participant_id, "Call negotiator stopped");
    }

    // ----- Commands -----

    async fn handle_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::Start { callee_id } => self.start_call(callee_id),
            CallCommand::Answer { call_id } => self.answer_call(call_id),
            CallCommand::End => self.teardown(EndReason::Local, true).await,
            CallCommand::ToggleMute => self.toggle_track(TrackKind::Audio),
            CallCommand::ToggleCamera => self.toggle_track(TrackKind::Video),
            CallCommand::ToggleMinimize => {
                self.state.is_minimized = !self.state.is_minimized;
                self.publish();
            }
        }
    }

    fn start_call(&mut self, callee_id: String) {
        if self.call.is_some() || self.ringing.is_some() {
            debug!(callee_id = %callee_id, phase = ?self.state.phase, "Ignoring start_call while busy");
            return;
        }
        if callee_id == self.identity.participant_id {
            warn!("Ignoring start_call addressed to self");
            return;
        }

        let attempt = self.begin_attempt();
        info!(attempt, callee_id = %callee_id, "Starting call");
        self.call = Some(LiveCall::new(attempt, CallRole::Caller, None, callee_id.clone()));
        self.state.phase = CallPhase::Pending(CallRole::Caller);
        self.state.peer_id = Some(callee_id);
        self.publish();
        self.acquire_media(attempt);
    }

    fn answer_call(&mut self, call_id: String) {
        if self.call.is_some() {
            debug!(call_id = %call_id, "Ignoring answer_call while in a call");
            return;
        }
        let caller_id = match self.ringing.take() {
            Some(ring) if ring.call_id == call_id => Some(ring.caller_id),
            Some(ring) => {
                debug!(ringing = %ring.call_id, answering = %call_id, "Answering a call other than the ringing one");
                None
            }
            None => None,
        };
        self.seen_incoming.insert(call_id.clone());
        self.begin_answer(call_id, caller_id);
    }

    /// Enter the callee flow. The phase is `Active` from here on, before
    /// media or the answer exist.
    fn begin_answer(&mut self, call_id: String, caller_id: Option<String>) {
        let attempt = self.begin_attempt();
        info!(attempt, call_id = %call_id, "Answering call");
        self.call = Some(LiveCall::new(
            attempt,
            CallRole::Callee,
            Some(call_id.clone()),
            caller_id.clone().unwrap_or_default(),
        ));
        self.state.phase = CallPhase::Active;
        self.state.call_id = Some(call_id);
        self.state.peer_id = caller_id;
        self.state.incoming = None;
        self.publish();
        self.acquire_media(attempt);
    }

    fn toggle_track(&mut self, kind: TrackKind) {
        let Some(local) = self.call.as_ref().and_then(|c| c.local.as_ref()) else {
            debug!(?kind, "No local media to toggle");
            return;
        };
        let Some(enabled) = local.toggle(kind) else {
            return;
        };
        match kind {
            TrackKind::Audio => self.state.is_muted = !enabled,
            TrackKind::Video => self.state.is_camera_on = enabled,
        }
        self.publish();
    }

    // ----- Media -----

    fn acquire_media(&self, attempt: u64) {
        let media = Arc::clone(&self.media);
        let constraints = self.config.constraints;
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = media.acquire_local_media(constraints).await;
            let _ = internal_tx.send(Internal::MediaReady { attempt, result });
        });
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::MediaReady { attempt, result } => self.on_media_ready(attempt, result).await,
            Internal::Session { attempt, event } => {
                if self.is_current(attempt) {
                    self.on_session_event(event).await;
                } else {
                    debug!(attempt, "Dropping session event from an ended call");
                }
            }
        }
    }

    async fn on_media_ready(&mut self, attempt: u64, result: Result<LocalStream, MediaError>) {
        if !self.is_current(attempt) {
            if let Ok(stream) = result {
                info!(attempt, stream = %stream.handle(), "Releasing media granted after its call ended");
                stream.stop();
            }
            return;
        }

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                self.fail(CallError::MediaDenied(e.to_string())).await;
                return;
            }
        };

        self.state.local_stream = Some(stream.handle().clone());
        self.state.is_muted = !stream.has_enabled(TrackKind::Audio);
        self.state.is_camera_on = stream.has_enabled(TrackKind::Video);
        let Some(call) = self.call.as_mut() else {
            stream.stop();
            return;
        };
        call.local = Some(stream);
        let role = call.role;
        self.publish();

        let negotiated = match role {
            CallRole::Caller => self.send_offer().await,
            CallRole::Callee => self.send_answer().await,
        };
        if let Err(e) = negotiated {
            self.fail(e).await;
        }
    }

    /// Create the peer session, attach local tracks and start forwarding
    /// its events.
    async fn open_session(&mut self) -> Result<Arc<dyn PeerSession>, CallError> {
        let session: Arc<dyn PeerSession> = Arc::from(
            self.media
                .create_session(&self.config.ice_servers)
                .await
                .map_err(session_failed)?,
        );
        let Some(call) = self.call.as_mut() else {
            session.close();
            return Err(CallError::Session("call ended during setup".to_string()));
        };
        call.session = Some(Arc::clone(&session));
        let attempt = call.attempt;
        let tracks = call
            .local
            .as_ref()
            .map(|local| local.tracks().to_vec())
            .unwrap_or_default();

        for track in tracks {
            session.add_track(track).map_err(session_failed)?;
        }
        if let Some(events) = session.take_events() {
            self.forward_session_events(attempt, events);
        }
        Ok(session)
    }

    fn forward_session_events(&self, attempt: u64, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        let internal_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if internal_tx.send(Internal::Session { attempt, event }).is_err() {
                    break;
                }
            }
        });
    }

    async fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::LocalIceCandidate(candidate) => {
                let target = self
                    .call
                    .as_ref()
                    .and_then(|c| Some((c.call_id.clone()?, c.local_side())));
                let Some((call_id, side)) = target else {
                    return;
                };
                match signaling::append_candidate(self.store.as_ref(), &call_id, side, &candidate).await {
                    Ok(key) => debug!(call_id = %call_id, key = %key, "Local ICE candidate published"),
                    Err(e) => self.fail(e).await,
                }
            }
            SessionEvent::RemoteTrack(stream) => {
                let call_id = self.state.call_id.clone().unwrap_or_default();
                info!(call_id = %call_id, stream = %stream, "Remote media arrived");
                self.state.remote_stream = Some(stream.clone());
                self.publish();
                self.emit(CallEvent::RemoteStream { call_id, stream }).await;
            }
        }
    }

    // ----- Negotiation -----

    /// Caller: create the offer and publish the pending record with it.
    async fn send_offer(&mut self) -> Result<(), CallError> {
        let call_id = self.store.new_key();
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };
        call.call_id = Some(call_id.clone());
        let callee_id = call.peer_id.clone();
        self.state.call_id = Some(call_id.clone());
        self.publish();

        let session = self.open_session().await?;
        let offer = session.create_offer().await.map_err(session_failed)?;
        session
            .set_local_description(&offer)
            .await
            .map_err(session_failed)?;

        let created_at = now_millis();
        let record = CallRecord {
            id: call_id.clone(),
            room_id: self.room_id.clone(),
            caller_id: self.identity.participant_id.clone(),
            callee_id,
            status: CallStatus::Pending,
            offer: Some(offer),
            answer: None,
            offer_candidates: BTreeMap::new(),
            answer_candidates: BTreeMap::new(),
            created_at,
        };
        signaling::write_offer(self.store.as_ref(), &record).await?;
        if let Some(call) = self.call.as_mut() {
            call.record_exists = true;
            call.created_at = Some(created_at);
        }
        info!(call_id = %call_id, callee_id = %record.callee_id, "Offer published");
        Ok(())
    }

    /// Callee: apply the stored offer, then publish the answer.
    async fn send_answer(&mut self) -> Result<(), CallError> {
        let Some(call_id) = self.call.as_ref().and_then(|c| c.call_id.clone()) else {
            return Ok(());
        };
        let record = signaling::load_call(self.store.as_ref(), &call_id)
            .await?
            .ok_or_else(|| CallError::MalformedCall(format!("call {call_id} has no readable record")))?;
        if record.callee_id != self.identity.participant_id {
            // Not ours to delete on the way out.
            if let Some(call) = self.call.as_mut() {
                call.record_exists = false;
            }
            return Err(CallError::MalformedCall(format!(
                "call {call_id} is addressed to {}",
                record.callee_id
            )));
        }
        let offer = record
            .offer
            .clone()
            .ok_or_else(|| CallError::MalformedCall(format!("call {call_id} has no offer")))?;

        if let Some(call) = self.call.as_mut() {
            call.peer_id = record.caller_id.clone();
        }
        self.state.peer_id = Some(record.caller_id.clone());
        self.publish();

        let session = self.open_session().await?;
        session
            .set_remote_description(&offer)
            .await
            .map_err(session_failed)?;
        if let Some(call) = self.call.as_mut() {
            call.remote_applied = true;
        }
        let answer = session.create_answer().await.map_err(session_failed)?;
        session
            .set_local_description(&answer)
            .await
            .map_err(session_failed)?;
        signaling::write_answer(self.store.as_ref(), &call_id, &answer).await?;

        info!(call_id = %call_id, caller_id = %record.caller_id, "Answer published");
        self.emit(CallEvent::Connected {
            call_id: call_id.clone(),
        })
        .await;
        self.apply_candidates(&record).await;
        Ok(())
    }

    async fn apply_answer(&mut self, call_id: &str, answer: &SessionDescription) -> Result<(), CallError> {
        let Some(session) = self.call.as_ref().and_then(|c| c.session.clone()) else {
            return Ok(());
        };
        session
            .set_remote_description(answer)
            .await
            .map_err(session_failed)?;
        if let Some(call) = self.call.as_mut() {
            call.remote_applied = true;
        }
        self.state.phase = CallPhase::Active;
        self.publish();
        info!(call_id, "Call connected");
        self.emit(CallEvent::Connected {
            call_id: call_id.to_string(),
        })
        .await;
        Ok(())
    }

    /// Apply the peer's candidates not applied yet, in key order. Nothing
    /// is applied before the remote description.
    async fn apply_candidates(&mut self, record: &CallRecord) {
        let Some(call) = self.call.as_mut() else {
            return;
        };
        if !call.remote_applied {
            return;
        }
        let Some(session) = call.session.clone() else {
            return;
        };
        let remote = record.remote_candidates(call.local_side());
        let fresh: Vec<(String, IceCandidate)> = remote
            .iter()
            .filter(|(key, _)| call.applied_candidates.insert((*key).clone()))
            .map(|(key, candidate)| (key.clone(), candidate.clone()))
            .collect();

        for (key, candidate) in fresh {
            if let Err(e) = session.add_remote_ice_candidate(&candidate).await {
                warn!(call_id = %record.id, key = %key, error = %e, "Failed to apply remote ICE candidate");
            }
        }
    }

    // ----- Store snapshots -----

    async fn handle_calls(&mut self, calls: &Value) {
        let records = signaling::parse_calls(calls);
        self.sync_live_call(&records).await;
        self.sync_ringing(&records).await;
        self.sync_incoming(&records).await;
        self.seen_incoming.retain(|id| records.contains_key(id));
    }

    async fn sync_live_call(&mut self, records: &BTreeMap<String, CallRecord>) {
        let Some(call) = self.call.as_ref() else {
            return;
        };
        let Some(call_id) = call.call_id.clone() else {
            return;
        };

        match records.get(&call_id) {
            None => {
                if call.record_exists {
                    info!(call_id = %call_id, "Call record removed by peer");
                    self.teardown(EndReason::Remote, false).await;
                    self.sweep_leftover(&call_id).await;
                }
            }
            Some(record) if record.status == CallStatus::Ended => {
                info!(call_id = %call_id, "Call marked ended by peer");
                self.teardown(EndReason::Remote, true).await;
            }
            Some(record) => {
                let awaiting_answer = call.role == CallRole::Caller && !call.remote_applied;
                if awaiting_answer {
                    if let Some(answer) = &record.answer {
                        if let Err(e) = self.apply_answer(&call_id, answer).await {
                            self.fail(e).await;
                            return;
                        }
                    }
                }
                self.apply_candidates(record).await;
            }
        }
    }

    /// Stop ringing once the rung record is gone or no longer pending.
    async fn sync_ringing(&mut self, records: &BTreeMap<String, CallRecord>) {
        let Some(ring) = self.ringing.as_ref() else {
            return;
        };
        let still_pending = records
            .get(&ring.call_id)
            .is_some_and(|r| r.status == CallStatus::Pending);
        if still_pending {
            return;
        }

        let call_id = ring.call_id.clone();
        self.ringing = None;
        info!(call_id = %call_id, "Incoming call withdrawn");
        self.state = CallState::default();
        self.publish();
        self.emit(CallEvent::IncomingCallWithdrawn { call_id }).await;
    }

    async fn sync_incoming(&mut self, records: &BTreeMap<String, CallRecord>) {
        for (call_id, record) in records {
            let addressed_here = record.status == CallStatus::Pending
                && record.callee_id == self.identity.participant_id
                && record.room_id == self.room_id;
            if !addressed_here || !self.seen_incoming.insert(call_id.clone()) {
                continue;
            }
            if self.is_stale(record) {
                debug!(call_id = %call_id, created_at = record.created_at, "Ignoring stale call record");
                continue;
            }
            if self.call.is_some() || self.ringing.is_some() {
                info!(call_id = %call_id, caller_id = %record.caller_id, "Busy, ignoring incoming call");
                continue;
            }

            match self.config.incoming_policy {
                IncomingCallPolicy::AutoAccept => {
                    info!(call_id = %call_id, caller_id = %record.caller_id, "Auto-answering incoming call");
                    self.begin_answer(call_id.clone(), Some(record.caller_id.clone()));
                }
                IncomingCallPolicy::ManualPrompt => {
                    info!(call_id = %call_id, caller_id = %record.caller_id, "Incoming call ringing");
                    let incoming = IncomingCall {
                        call_id: call_id.clone(),
                        caller_id: record.caller_id.clone(),
                    };
                    self.state.phase = CallPhase::Pending(CallRole::Callee);
                    self.state.call_id = Some(call_id.clone());
                    self.state.peer_id = Some(record.caller_id.clone());
                    self.state.incoming = Some(incoming.clone());
                    self.ringing = Some(incoming.clone());
                    self.publish();
                    self.emit(CallEvent::IncomingCall(incoming)).await;
                }
            }
        }
    }

    fn is_stale(&self, record: &CallRecord) -> bool {
        self.config
            .pending_timeout
            .is_some_and(|timeout| now_millis() - record.created_at > millis(timeout))
    }

    async fn check_expiry(&mut self) {
        let Some(timeout) = self.config.pending_timeout else {
            return;
        };
        let expired = self.call.as_ref().is_some_and(|call| {
            call.role == CallRole::Caller
                && !call.remote_applied
                && call
                    .created_at
                    .is_some_and(|at| now_millis() - at >= millis(timeout))
        });
        if expired {
            info!(call_id = ?self.state.call_id, "Outgoing call expired unanswered");
            self.teardown(EndReason::Expired, true).await;
        }
    }

    // ----- Teardown -----

    async fn fail(&mut self, error: CallError) {
        self.teardown(EndReason::Failed(error), true).await;
    }

    /// Release everything the current call holds and return to `Idle`.
    ///
    /// Safe to call in any state. With no call in flight it only clears
    /// ringing and resets the published state.
    async fn teardown(&mut self, reason: EndReason, delete_record: bool) {
        let was_ringing = self.ringing.take().is_some();
        let Some(call) = self.call.take() else {
            if was_ringing || self.state != CallState::default() {
                self.state = CallState::default();
                self.publish();
            }
            return;
        };

        if let Some(local) = &call.local {
            local.stop();
        }
        if let Some(session) = &call.session {
            session.close();
        }
        if delete_record && call.record_exists {
            if let Some(call_id) = &call.call_id {
                if let Err(e) = signaling::delete_call(self.store.as_ref(), call_id).await {
                    let error = CallError::TeardownFailed(e.to_string());
                    debug!(call_id = %call_id, %error, "Call record cleanup failed");
                }
            }
        }

        match &reason {
            EndReason::Failed(error) => {
                warn!(call_id = ?call.call_id, %error, "Call failed");
            }
            _ => info!(call_id = ?call.call_id, ?reason, "Call ended"),
        }
        self.state.phase = CallPhase::Ended;
        self.publish();
        self.emit(CallEvent::Ended {
            call_id: call.call_id,
            reason,
        })
        .await;
        self.state = CallState::default();
        self.publish();
    }

    /// A candidate pushed before the peer's deletion was seen re-creates a
    /// fragment under the call id. No further writes follow teardown, so
    /// one sweep clears it.
    async fn sweep_leftover(&self, call_id: &str) {
        match signaling::remove_leftover(self.store.as_ref(), call_id).await {
            Ok(true) => debug!(call_id = %call_id, "Removed leftover call fragment"),
            Ok(false) => {}
            Err(e) => {
                let error = CallError::TeardownFailed(e.to_string());
                debug!(call_id = %call_id, %error, "Leftover call fragment cleanup failed");
            }
        }
    }

    // ----- Helpers -----

    fn begin_attempt(&mut self) -> u64 {
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        attempt
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.call.as_ref().is_some_and(|c| c.attempt == attempt)
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    async fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event).await;
    }
}
