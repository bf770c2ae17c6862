use std::path::PathBuf;

/// Core error type for the relay.
///
/// Adapter crates should map their specific errors into this type so the
/// engine can log and classify failures consistently.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config file: {path}: {reason}")]
    ConfigFile { path: PathBuf, reason: String },

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
