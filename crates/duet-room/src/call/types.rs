//! Call state, events, configuration and errors.

use std::time::Duration;

use crate::media::{IceServer, MediaConstraints, StreamHandle};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a call addressed to this participant shows up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IncomingCallPolicy {
    /// Answer immediately.
    #[default]
    AutoAccept,
    /// Ring and wait for `answer_call` or `end_call`.
    ManualPrompt,
}

#[derive(Debug, Clone)]
pub struct CallConfig {
    pub ice_servers: Vec<IceServer>,
    pub incoming_policy: IncomingCallPolicy,
    /// Unanswered outgoing calls are abandoned after this long, and
    /// incoming pending records older than this are ignored. `None`
    /// waits forever.
    pub pending_timeout: Option<Duration>,
    pub constraints: MediaConstraints,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::public_stun()],
            incoming_policy: IncomingCallPolicy::default(),
            pending_timeout: None,
            constraints: MediaConstraints::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallPhase {
    #[default]
    Idle,
    /// Caller: waiting for media or an answer. Callee: ringing.
    Pending(CallRole),
    Active,
    /// Published briefly during teardown before returning to `Idle`.
    Ended,
}

impl CallPhase {
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// A call waiting for this participant to answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCall {
    pub call_id: String,
    pub caller_id: String,
}

/// Everything a call UI renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallState {
    pub phase: CallPhase,
    pub call_id: Option<String>,
    pub peer_id: Option<String>,
    pub is_muted: bool,
    pub is_camera_on: bool,
    pub is_minimized: bool,
    pub local_stream: Option<StreamHandle>,
    pub remote_stream: Option<StreamHandle>,
    pub incoming: Option<IncomingCall>,
}

impl Default for CallState {
    fn default() -> Self {
        Self {
            phase: CallPhase::Idle,
            call_id: None,
            peer_id: None,
            is_muted: false,
            is_camera_on: true,
            is_minimized: false,
            local_stream: None,
            remote_stream: None,
            incoming: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// `end_call` on this side.
    Local,
    /// The peer ended the call or withdrew the record.
    Remote,
    /// Nobody answered within the pending timeout.
    Expired,
    Failed(CallError),
}

/// Notifications for the UI, alongside the `CallState` stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    IncomingCall(IncomingCall),
    /// A ringing call was ended by the caller before it was answered.
    IncomingCallWithdrawn { call_id: String },
    /// Offer and answer are both applied.
    Connected { call_id: String },
    RemoteStream { call_id: String, stream: StreamHandle },
    Ended {
        call_id: Option<String>,
        reason: EndReason,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("media access denied: {0}")]
    MediaDenied(String),

    #[error("malformed call record: {0}")]
    MalformedCall(String),

    #[error("failed to write signaling data: {0}")]
    SignalingWriteFailed(String),

    #[error("failed to read signaling data: {0}")]
    SignalingReadFailed(String),

    #[error("peer session failed: {0}")]
    Session(String),

    #[error("failed to clean up call: {0}")]
    TeardownFailed(String),

    #[error("call negotiator is not running")]
    NegotiatorClosed,
}
