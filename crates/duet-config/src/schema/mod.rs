//! Configuration schema types for Duet.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod call;
mod ice;
mod system;

pub use call::*;
pub use ice::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration for Duet.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DuetConfig {
    pub identity: IdentitySection,
    pub call: CallSection,
    pub ice: IceSection,
    pub typing: TypingSection,
    pub logging: LoggingSection,
}

// =============================================================================
// Tests
// =============================================================================
