//! Media capability traits and the handles they hand out.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::protocol::{IceCandidate, SessionDescription};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("media permission denied: {0}")]
    PermissionDenied(String),

    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("peer session error: {0}")]
    Session(String),

    #[error("peer session is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// Streams and tracks
// ---------------------------------------------------------------------------

/// Opaque reference to a local or remote media stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamHandle(String);

impl StreamHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// A single captured audio or video track.
pub trait MediaTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> TrackKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&self, enabled: bool);
    /// Release the capture device. A stopped track stays stopped.
    fn stop(&self);
    fn is_live(&self) -> bool;
}

/// Which kinds of media to capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

/// Locally captured tracks, owned by whichever call acquired them.
pub struct LocalStream {
    handle: StreamHandle,
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalStream {
    pub fn new(handle: StreamHandle, tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { handle, tracks }
    }

    pub fn handle(&self) -> &StreamHandle {
        &self.handle
    }

    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    pub fn has_enabled(&self, kind: TrackKind) -> bool {
        self.tracks
            .iter()
            .any(|t| t.kind() == kind && t.is_enabled())
    }

    /// Flip every track of `kind` and return the new enabled state.
    ///
    /// Returns `None` when the stream has no track of that kind.
    pub fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let matching: Vec<_> = self.tracks.iter().filter(|t| t.kind() == kind).collect();
        let first = matching.first()?;
        let enabled = !first.is_enabled();
        for track in matching {
            track.set_enabled(enabled);
        }
        Some(enabled)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

impl std::fmt::Debug for LocalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStream")
            .field("handle", &self.handle)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ICE servers
// ---------------------------------------------------------------------------

/// A STUN or TURN server handed to new peer sessions.
#[derive(Clone, PartialEq, Eq)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Public STUN server used when nothing else is configured.
    pub fn public_stun() -> Self {
        Self::stun("stun:stun.l.google.com:19302")
    }
}

impl std::fmt::Debug for IceServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceServer")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Something a peer session reports on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The remote side's media became available.
    RemoteTrack(StreamHandle),
    /// A local ICE candidate was gathered and must reach the peer.
    LocalIceCandidate(IceCandidate),
}

/// One peer-to-peer media session.
#[async_trait]
pub trait PeerSession: Send + Sync {
    fn add_track(&self, track: Arc<dyn MediaTrack>) -> Result<(), MediaError>;

    /// Hand over the session's event stream. Only the first call returns it.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SessionEvent>>;

    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;
    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;
    async fn set_local_description(&self, description: &SessionDescription) -> Result<(), MediaError>;
    async fn set_remote_description(&self, description: &SessionDescription) -> Result<(), MediaError>;
    async fn add_remote_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), MediaError>;

    fn close(&self);
}

/// Capture devices plus the peer connection stack.
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Ask for camera and microphone access. May wait on a user prompt.
    async fn acquire_local_media(&self, constraints: MediaConstraints) -> Result<LocalStream, MediaError>;

    async fn create_session(&self, ice_servers: &[IceServer]) -> Result<Box<dyn PeerSession>, MediaError>;
}
