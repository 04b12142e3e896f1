//! Error types for the conversation engine.

use crate::fields::ValidationFailure;

/// Errors a caller of the engine can observe.
///
/// Storage and collaborator failures are absorbed inside a turn; only input
/// the engine cannot attribute to anyone is refused outright.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("identity has no usable digits: {0:?}")]
    InvalidIdentity(String),
}

/// Errors from addressing a field by position.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("field index {index} out of range 1..={max}")]
    IndexOutOfRange { index: usize, max: usize },
    #[error("invalid value for {}: {}", .0.field, .0.message)]
    Validation(ValidationFailure),
}
