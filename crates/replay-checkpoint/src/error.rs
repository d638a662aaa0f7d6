//! Error types for replay-checkpoint

use thiserror::Error;

/// Result type for replay-checkpoint operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while saving or loading checkpoints
#[derive(Error, Debug)]
pub enum Error {
    /// No DONE-marked checkpoint directory exists under any searched root
    #[error("no valid checkpoint found under {0}")]
    NoCheckpoint(String),

    /// A record failed its integrity check
    #[error("corrupt record in {path}: {message}")]
    CorruptRecord {
        /// File holding the bad record
        path: String,
        /// What went wrong
        message: String,
    },

    /// Serialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A table or chunk failed to rebuild
    #[error("restore error: {0}")]
    Restore(#[from] replay_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
