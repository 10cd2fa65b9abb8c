//! Call negotiation settings.

use serde::{Deserialize, Serialize};

/// What to do when a call arrives for this participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncomingPolicy {
    /// Answer as soon as the offer is seen.
    #[default]
    AutoAccept,
    /// Surface the call and wait for the user.
    ManualPrompt,
}

/// `[call]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSection {
    pub incoming_policy: IncomingPolicy,
    /// Seconds a call may stay pending before it is withdrawn.
    /// 0 disables expiry (valid range otherwise: 5-3600).
    pub pending_timeout_secs: u32,
    pub audio: bool,
    pub video: bool,
}

impl Default for CallSection {
    fn default() -> Self {
        Self {
            incoming_policy: IncomingPolicy::AutoAccept,
            pending_timeout_secs: 0,
            audio: true,
            video: true,
        }
    }
}

impl CallSection {
    pub fn pending_timeout(&self) -> Option<std::time::Duration> {
        match self.pending_timeout_secs {
            0 => None,
            secs => Some(std::time::Duration::from_secs(u64::from(secs))),
        }
    }
}
