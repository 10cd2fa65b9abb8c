use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("config parse error: {0}")]
    ParseError(String),

    #[error("config validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DuetError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(String),

    #[error("room error: {0}")]
    Room(String),

    #[error("call error: {0}")]
    Call(String),

    #[error("media error: {0}")]
    Media(String),

    #[error("{0}")]
    Other(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let err = ConfigError::FileNotFound(PathBuf::from("/tmp/missing.toml"));
        assert_eq!(err.to_string(), "config file not found: /tmp/missing.toml");

        let err = ConfigError::ParseError("unexpected token".into());
        assert_eq!(err.to_string(), "config parse error: unexpected token");

        let err = ConfigError::ValidationError("ice.servers is empty".into());
        assert_eq!(
            err.to_string(),
            "config validation error: ice.servers is empty"
        );
    }

    #[test]
    fn duet_error_from_config() {
        let config_err = ConfigError::ParseError("bad toml".into());
        let err: DuetError = config_err.into();
        assert!(matches!(err, DuetError::Config(_)));
        assert!(err.to_string().contains("bad toml"));
    }

    #[test]
    fn duet_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: DuetError = io_err.into();
        assert!(matches!(err, DuetError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn duet_error_other_variants() {
        let err = DuetError::Store("write rejected".into());
        assert_eq!(err.to_string(), "store error: write rejected");

        let err = DuetError::Room("room R1 is full".into());
        assert_eq!(err.to_string(), "room error: room R1 is full");

        let err = DuetError::Call("media denied".into());
        assert_eq!(err.to_string(), "call error: media denied");

        let err = DuetError::Media("no camera".into());
        assert_eq!(err.to_string(), "media error: no camera");

        let err = DuetError::Other("something went wrong".into());
        assert_eq!(err.to_string(), "something went wrong");
    }
}
