//! Error types for replay-core

use thiserror::Error;

/// Result type for replay-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Sentinel message carried by rate-limiter admission timeouts.
///
/// Stream hosts match on this to close a sampler stream cleanly instead of
/// surfacing a fatal error.
pub const RATE_LIMITER_TIMEOUT_MESSAGE: &str =
    "rate limiter: deadline exceeded waiting for admission";

/// Errors that can occur in replay-core
#[derive(Error, Debug)]
pub enum Error {
    /// A caller-supplied argument is invalid
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation requires state the system is not in
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// A referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A blocking wait exceeded its deadline
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// The operation was cancelled, typically by `Table::close`
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Queue or buffer capacity was exhausted
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invariant violation; indicates a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build the dedicated rate-limiter admission timeout.
    pub fn rate_limiter_timeout() -> Self {
        Self::DeadlineExceeded(RATE_LIMITER_TIMEOUT_MESSAGE.to_string())
    }

    /// True when this error is the rate-limiter admission timeout.
    pub fn is_rate_limiter_timeout(&self) -> bool {
        matches!(self, Self::DeadlineExceeded(msg) if msg.contains(RATE_LIMITER_TIMEOUT_MESSAGE))
    }
}
