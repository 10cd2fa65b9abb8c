//! Turns the loaded `DuetConfig` into the values the room and call layers take.

use std::time::Duration;

use duet_config::{DuetConfig, IncomingPolicy};
use duet_room::{CallConfig, IceServer, IncomingCallPolicy, MediaConstraints};

/// Directive used when neither the CLI nor the config names a level.
pub const DEFAULT_LOG_DIRECTIVE: &str = "duet=info";

/// Pick the log filter directive: CLI override first, then the config level.
pub fn log_directive(cli_level: Option<&str>, config: Option<&DuetConfig>) -> String {
    if let Some(level) = cli_level {
        return level.to_string();
    }
    match config {
        Some(config) => format!("duet={}", config.logging.level.as_filter()),
        None => DEFAULT_LOG_DIRECTIVE.to_string(),
    }
}

pub fn call_config(config: &DuetConfig) -> CallConfig {
    let ice_servers = config
        .ice
        .servers
        .iter()
        .map(|entry| IceServer {
            urls: entry.urls.clone(),
            username: entry.username.clone(),
            credential: entry.credential.clone(),
        })
        .collect();

    let incoming_policy = match config.call.incoming_policy {
        IncomingPolicy::AutoAccept => IncomingCallPolicy::AutoAccept,
        IncomingPolicy::ManualPrompt => IncomingCallPolicy::ManualPrompt,
    };

    CallConfig {
        ice_servers,
        incoming_policy,
        pending_timeout: config.call.pending_timeout(),
        constraints: MediaConstraints {
            audio: config.call.audio,
            video: config.call.video,
        },
    }
}

pub fn typing_idle(config: &DuetConfig) -> Duration {
    config.typing.idle_timeout()
}

/// The configured display name, or one derived from the host.
pub fn display_name(config: &DuetConfig) -> String {
    let configured = config.identity.display_name.trim();
    if !configured.is_empty() {
        return configured.to_string();
    }
    ["HOSTNAME", "COMPUTERNAME", "USER", "USERNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| "guest".to_string())
}
