use thiserror::Error;

/// Errors from the fallible edges of the crate: configuration, logging setup and
/// background thread creation. Queue and limiter operations never fail.
#[derive(Error, Debug)]
pub enum WorkQueueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Thread spawn error: {0}")]
    ThreadSpawn(String),
    #[error("Logging initialization error: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, WorkQueueError>;
