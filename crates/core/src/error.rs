//! Core Error Types
//!
//! Failures of the shared types themselves. Only thiserror and std are
//! involved so the core crate stays lightweight; transport and application
//! errors wrap this type.

use thiserror::Error;

/// Core error type for the Wiki Lens workspace.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A settings string that could not be parsed (proxy URLs)
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}
