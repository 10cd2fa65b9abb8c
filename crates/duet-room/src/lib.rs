//! Two-person rooms with chat, presence and one-to-one video calls,
//! synchronized through a shared hierarchical store.
//!
//! The store and the media stack are capabilities (`SharedStore`,
//! `MediaTransport`) so the room and call logic run the same against the
//! in-process `MemoryStore` and `LoopbackMedia` as against hosted backends.

pub mod call;
pub mod identity;
pub mod media;
pub mod protocol;
pub mod room;
pub mod store;

pub use call::{
    CallConfig, CallError, CallEvent, CallNegotiator, CallPhase, CallRole, CallState, EndReason,
    IncomingCall, IncomingCallPolicy,
};
pub use identity::Identity;
pub use media::{
    IceServer, LocalStream, LoopbackMedia, MediaConstraints, MediaError, MediaTrack,
    MediaTransport, PeerSession, SessionEvent, StreamHandle, TrackKind,
};
pub use protocol::{MessageKind, Participant};
pub use room::{
    Attachment, Message, MessageDraft, RoomError, RoomSession, RoomSnapshot, SendOutcome,
    TypingIndicator, UploadError, Uploader, MAX_ONLINE_PARTICIPANTS,
};
pub use store::{MemoryConnection, MemoryStore, SharedStore, StoreError, StoreWatch};
