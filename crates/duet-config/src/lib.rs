//! Duet configuration system.
//!
//! Provides TOML-based configuration with full validation. All config
//! sections use sensible defaults so partial configs work out of the box.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use duet_config::{load_config, config_to_json};
//!
//! let config = load_config().expect("failed to load config");
//! let json = config_to_json(&config);
//! println!("{json}");
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    CallSection, DuetConfig, IceSection, IceServerEntry, IncomingPolicy, LogLevel,
    CONFIG_SCHEMA_VERSION,
};

use duet_common::ConfigError;

/// Convenience function to load config from the platform default path.
///
/// Loads `config.toml` from the OS config directory, creates a default
/// if none exists, and validates the result.
pub fn load_config() -> Result<DuetConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}

/// Load and validate a config from an explicit path.
pub fn load_config_from(path: &std::path::Path) -> Result<DuetConfig, ConfigError> {
    let config = toml_loader::load_from_path(path)?;
    validation::validate(&config)?;
    Ok(config)
}

/// Serialize a config to a pretty-printed JSON string.
pub fn config_to_json(config: &DuetConfig) -> String {
    serde_json::to_string_pretty(config)
        .unwrap_or_else(|e| format!("{{\"error\": \"failed to serialize config: {e}\"}}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_to_json_contains_all_sections() {
        let json = config_to_json(&DuetConfig::default());
        assert!(json.contains("\"identity\""));
        assert!(json.contains("\"call\""));
        assert!(json.contains("\"ice\""));
        assert!(json.contains("\"typing\""));
        assert!(json.contains("\"logging\""));
        assert!(json.contains("\"auto_accept\""));
    }

    #[test]
    fn config_schema_version_is_1() {
        assert_eq!(CONFIG_SCHEMA_VERSION, 1);
    }

    #[test]
    fn load_config_from_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[[ice.servers]]\nurls = [\"http://x\"]\n").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let json = config_to_json(&DuetConfig::default());
        let parsed: DuetConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.typing.idle_timeout_ms, 1000);
        assert_eq!(parsed.logging.level, LogLevel::Info);
    }
}
