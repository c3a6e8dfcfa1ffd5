//! Common error types for run detection

use thiserror::Error;

/// Common result type for run detection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the run detection crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),
}
