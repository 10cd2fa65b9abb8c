//! Tests for the full validation pipeline.

use super::*;
use crate::schema::*;

fn turn_server() -> IceServerEntry {
    IceServerEntry {
        urls: vec!["turn:relay.example.org:3480".into()],
        username: Some("duet".into()),
        credential: Some("s3cret".into()),
    }
}

#[test]
fn default_config_validates() {
    let config = DuetConfig::default();
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_empty_ice_server_list() {
    let mut config = DuetConfig::default();
    config.ice.servers.clear();
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("at least one server"));
}

#[test]
fn catches_bad_ice_url_scheme() {
    let mut config = DuetConfig::default();
    config.ice.servers = vec![IceServerEntry::stun("http://stun.example.org")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("ice.servers[0].urls"));
}

#[test]
fn catches_ice_url_with_whitespace() {
    let mut config = DuetConfig::default();
    config.ice.servers = vec![IceServerEntry::stun("stun:bad host:3478")];
    assert!(validate(&config).is_err());
}

#[test]
fn accepts_turn_server_with_credentials() {
    let mut config = DuetConfig::default();
    config.ice.servers.push(turn_server());
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_turn_server_without_credential() {
    let mut config = DuetConfig::default();
    let mut server = turn_server();
    server.credential = None;
    config.ice.servers.push(server);
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("ice.servers[1]"));
    assert!(err.contains("username and credential"));
}

#[test]
fn zero_pending_timeout_is_allowed() {
    let mut config = DuetConfig::default();
    config.call.pending_timeout_secs = 0;
    assert!(validate(&config).is_ok());
}

#[test]
fn catches_pending_timeout_too_small() {
    let mut config = DuetConfig::default();
    config.call.pending_timeout_secs = 2;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("call.pending_timeout_secs"));
}

#[test]
fn catches_pending_timeout_too_large() {
    let mut config = DuetConfig::default();
    config.call.pending_timeout_secs = 7200;
    assert!(validate(&config).is_err());
}

#[test]
fn catches_all_media_disabled() {
    let mut config = DuetConfig::default();
    config.call.audio = false;
    config.call.video = false;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("call.audio"));
}

#[test]
fn catches_typing_timeout_out_of_range() {
    let mut config = DuetConfig::default();
    config.typing.idle_timeout_ms = 50;
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("typing.idle_timeout_ms"));
}

#[test]
fn collects_multiple_errors() {
    let mut config = DuetConfig::default();
    config.typing.idle_timeout_ms = 50_000;
    config.call.pending_timeout_secs = 1;
    config.ice.servers = vec![IceServerEntry::stun("udp://nowhere")];
    let err = validate(&config).unwrap_err().to_string();
    assert!(err.contains("typing.idle_timeout_ms"));
    assert!(err.contains("call.pending_timeout_secs"));
    assert!(err.contains("ice.servers[0]"));
}
