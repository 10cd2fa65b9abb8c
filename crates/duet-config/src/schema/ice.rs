//! ICE server list handed to every peer session.

use serde::{Deserialize, Serialize};

/// Public STUN server used when the config names none.
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// One `[[ice.servers]]` entry.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl IceServerEntry {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Whether any URL points at a relay (`turn:` or `turns:`).
    pub fn is_relay(&self) -> bool {
        self.urls
            .iter()
            .any(|u| u.starts_with("turn:") || u.starts_with("turns:"))
    }
}

impl std::fmt::Debug for IceServerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IceServerEntry")
            .field("urls", &self.urls)
            .field("username", &self.username)
            .field(
                "credential",
                &self.credential.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// `[ice]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceSection {
    pub servers: Vec<IceServerEntry>,
}

impl Default for IceSection {
    fn default() -> Self {
        Self {
            servers: vec![IceServerEntry::stun(DEFAULT_STUN_URL)],
        }
    }
}
