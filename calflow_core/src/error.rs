//! Error kinds shared by every layer of the reconstruction core.

use thiserror::Error;

/// Failure of a core operation.
///
/// Every mutating call returns one of these immediately; nothing in the core
/// swallows an error except optional settings lookups (`NotFound` → default).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PfError {
    /// Name, handle, algorithm or list lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Queried before the event or list was set up
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Would break an ownership, availability or non-empty invariant
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Malformed input to a creation call
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Generic failure (zero divisor, collaborator error, panic)
    #[error("Failure: {0}")]
    Failure(String),
}

/// Result alias used throughout the core.
pub type PfResult<T> = Result<T, PfError>;

impl PfError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn not_initialized(msg: impl Into<String>) -> Self {
        Self::NotInitialized(msg.into())
    }

    pub fn not_allowed(msg: impl Into<String>) -> Self {
        Self::NotAllowed(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn failure(msg: impl Into<String>) -> Self {
        Self::Failure(msg.into())
    }

    /// True for the lookup-miss kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PfError::NotFound(_))
    }
}

impl From<calflow_env::EnvError> for PfError {
    fn from(err: calflow_env::EnvError) -> Self {
        match err {
            calflow_env::EnvError::SettingsError(msg) => PfError::InvalidParameter(msg),
            other => PfError::Failure(other.to_string()),
        }
    }
}
