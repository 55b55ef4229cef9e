//! Error types for the CalFlow environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Underlying reader/writer failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Event file content did not match the expected layout
    #[error("Format error: {0}")]
    FormatError(String),

    /// Settings document could not be parsed or is inconsistent
    #[error("Settings error: {0}")]
    SettingsError(String),
}

impl EnvError {
    /// Creates a format error.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::FormatError(msg.into())
    }

    /// Creates a settings error.
    pub fn settings(msg: impl Into<String>) -> Self {
        Self::SettingsError(msg.into())
    }
}

impl From<serde_json::Error> for EnvError {
    fn from(err: serde_json::Error) -> Self {
        Self::SettingsError(err.to_string())
    }
}
