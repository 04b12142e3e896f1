//! Shared building blocks for the intake conversation engine.
//!
//! Holds configuration, the top-level error type, and the identity and
//! timestamp newtypes used by every other crate in the workspace.

pub mod config;
pub mod error;
pub mod types;

pub use config::IntakeConfig;
pub use error::{IntakeError, Result};
pub use types::*;
