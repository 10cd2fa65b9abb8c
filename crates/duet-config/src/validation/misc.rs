//! Validation for the call and typing sections.

use crate::schema::DuetConfig;

use super::helpers::validate_range;

/// Validate call constraints. A zero timeout means expiry is off.
pub(crate) fn validate_call(errors: &mut Vec<String>, config: &DuetConfig) {
    if config.call.pending_timeout_secs != 0 {
        validate_range(
            errors,
            "call.pending_timeout_secs",
            config.call.pending_timeout_secs,
            5,
            3600,
        );
    }
    if !config.call.audio && !config.call.video {
        errors.push("call.audio and call.video cannot both be disabled".into());
    }
}

/// Validate typing constraints.
pub(crate) fn validate_typing(errors: &mut Vec<String>, config: &DuetConfig) {
    validate_range(
        errors,
        "typing.idle_timeout_ms",
        config.typing.idle_timeout_ms,
        200,
        10_000,
    );
}
