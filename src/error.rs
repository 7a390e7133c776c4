//! Error types for cards-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error, including out-of-range step lookups.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid argument to a constructor or sampling step.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Inconsistent model configuration.
    #[error("config: {0}")]
    Config(String),

    /// A conditioning input enabled by the model config was not supplied.
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
