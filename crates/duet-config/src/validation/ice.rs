//! ICE server validation: URL schemes and relay credentials.

use std::sync::OnceLock;

use regex::Regex;

use crate::schema::DuetConfig;

fn ice_url_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(stun|turn|turns):\S+$").ok())
        .as_ref()
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

pub(crate) fn validate_ice(errors: &mut Vec<String>, config: &DuetConfig) {
    let servers = &config.ice.servers;
    if servers.is_empty() {
        errors.push("ice.servers must list at least one server".into());
        return;
    }

    for (i, server) in servers.iter().enumerate() {
        if server.urls.is_empty() {
            errors.push(format!("ice.servers[{i}].urls is empty"));
        }
        for url in &server.urls {
            if !ice_url_pattern().is_some_and(|re| re.is_match(url)) {
                errors.push(format!(
                    "ice.servers[{i}].urls: '{url}' is not a stun:, turn: or turns: URL"
                ));
            }
        }
        if server.is_relay() && (is_blank(&server.username) || is_blank(&server.credential)) {
            errors.push(format!(
                "ice.servers[{i}] is a relay and needs both username and credential"
            ));
        }
    }
}
