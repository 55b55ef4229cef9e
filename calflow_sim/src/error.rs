//! Error types for the simulation harness.

use calflow_core::PfError;
use calflow_env::EnvError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    /// Reconstruction could not be configured
    #[error("Reconstruction error: {0}")]
    Core(#[from] PfError),

    /// Event or settings I/O failed
    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    /// Export could not be written
    #[error("Export error: {0}")]
    Export(#[from] std::io::Error),
}
