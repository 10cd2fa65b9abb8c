//! Identity, typing, and logging settings.

use serde::{Deserialize, Serialize};

/// `[identity]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IdentitySection {
    /// Name shown to the other participant. Empty means derive one.
    pub display_name: String,
}

/// `[typing]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TypingSection {
    /// Quiet period before the typing flag clears (valid range: 200-10000).
    pub idle_timeout_ms: u32,
}

impl Default for TypingSection {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1000,
        }
    }
}

impl TypingSection {
    pub fn idle_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.idle_timeout_ms))
    }
}

/// Log level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// The matching `tracing` filter level name.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingSection {
    pub level: LogLevel,
}
