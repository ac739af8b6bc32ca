//! Error types shared across sitehook crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid target configuration: {0}")]
    InvalidTarget(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout after {0:?}")]
    Timeout(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
