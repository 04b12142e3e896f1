use thiserror::Error;

/// Top-level error type for the intake engine.
///
/// Store-layer variants (`Storage`, `StoreUnavailable`, `Timeout`,
/// `CorruptState`) are absorbed by the session store and never reach a
/// conversation turn. `Collaborator` is the only variant a turn can observe,
/// and even that is turned into a retryable reply.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IntakeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Primary store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Store operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Corrupt session state for {key}: {reason}")]
    CorruptState { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for IntakeError {
    fn from(err: toml::de::Error) -> Self {
        IntakeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for IntakeError {
    fn from(err: toml::ser::Error) -> Self {
        IntakeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(err: serde_json::Error) -> Self {
        IntakeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for intake operations.
pub type Result<T> = std::result::Result<T, IntakeError>;
