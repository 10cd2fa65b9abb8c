//! Local capture and peer-to-peer session capabilities.
//!
//! The call negotiator only sees the `MediaTransport` and `PeerSession`
//! traits. `LoopbackMedia` implements both in-process for the demo binary
//! and for tests.

mod loopback;
mod types;

pub use loopback::{LoopbackMedia, LoopbackSession, PermissionGate, SessionLog};
pub use types::{
    IceServer, LocalStream, MediaConstraints, MediaError, MediaTrack, MediaTransport, PeerSession,
    SessionEvent, StreamHandle, TrackKind,
};
