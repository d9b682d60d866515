//! Error types shared across Scout crates.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ScoutError>;

/// Errors raised while loading or saving configuration.
#[derive(Debug, Error)]
pub enum ScoutError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
