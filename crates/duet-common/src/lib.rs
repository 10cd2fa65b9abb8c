pub mod errors;
pub mod id;
pub mod time;

pub use errors::{ConfigError, DuetError};
pub use id::new_id;
pub use time::now_millis;

pub type Result<T> = std::result::Result<T, DuetError>;
