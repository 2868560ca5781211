use thiserror::Error;

/// Top-level error type for the Framegate pipeline.
///
/// Subsystem crates define their own error types where they need finer
/// granularity and implement `From<SubsystemError> for FramegateError` so
/// that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FramegateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Queue full for camera {camera_id}: {limit} frames pending")]
    QueueFull { camera_id: String, limit: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FramegateError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        FramegateError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<toml::de::Error> for FramegateError {
    fn from(err: toml::de::Error) -> Self {
        FramegateError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for FramegateError {
    fn from(err: toml::ser::Error) -> Self {
        FramegateError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for FramegateError {
    fn from(err: serde_json::Error) -> Self {
        FramegateError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Framegate operations.
pub type Result<T> = std::result::Result<T, FramegateError>;
