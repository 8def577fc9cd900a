use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioSearchError {
    /// Bad configuration detected at construction time; the service must not start.
    #[error("Configuration error: {0}")]
    Config(String),
    /// Programming error in the caller (wrong dimension, unknown content type, ...).
    #[error("Invalid usage: {0}")]
    Usage(String),
    /// An index or model was used before it was built/loaded.
    #[error("Not ready: {0}")]
    NotBuilt(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// Missing or malformed corpus artifacts.
    #[error("Corpus error: {0}")]
    Corpus(String),
    #[error("Model error: {0}")]
    Model(String),
}

pub type Result<T> = std::result::Result<T, AudioSearchError>;
