//! One-to-one call negotiation over the shared store.
//!
//! The caller writes a pending call record carrying its offer, the callee
//! answers into the same record, and both sides append ICE candidates to
//! it. Deleting the record ends the call for both sides.

mod actor;
mod handle;
mod signaling;
mod types;


pub use handle::CallNegotiator;
pub use types::{
    CallConfig, CallError, CallEvent, CallPhase, CallRole, CallState, EndReason, IncomingCall,
    IncomingCallPolicy,
};
