//! Full configuration validation.
//!
//! Each domain has its own submodule; this orchestrator calls them all
//! and collects errors into a single `ConfigError`.

mod helpers;
mod ice;
mod misc;

#[cfg(test)]
mod tests;

use crate::schema::DuetConfig;
use duet_common::ConfigError;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &DuetConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    ice::validate_ice(&mut errors, config);
    misc::validate_call(&mut errors, config);
    misc::validate_typing(&mut errors, config);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
