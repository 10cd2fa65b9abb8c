//! Room presence and chat synchronization.
//!
//! A room admits two online participants. Each one holds a `RoomSession`
//! that publishes its presence, appends messages and reactions, and sees
//! the room as a stream of complete snapshots rebuilt from the store.

mod session;
mod snapshot;
mod types;
mod typing;
mod upload;

#[cfg(test)]
mod tests;

pub use session::RoomSession;
pub use types::{
    Message, MessageDraft, RoomError, RoomSnapshot, SendOutcome, MAX_ONLINE_PARTICIPANTS,
};
pub use typing::TypingIndicator;
pub use upload::{Attachment, UploadError, Uploader};
