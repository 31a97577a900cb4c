//! Error types for the observation engine.
//!
//! Only user-supplied closures can fail: the tracked function and the
//! consumer callback. The engine wraps whatever they return so callers can
//! tell which side failed. Handle misuse (stopping twice, syncing a
//! synchronous observer) is a benign `false` return, never an error.

use thiserror::Error;

/// Boxed error returned by user-supplied closures.
pub type BoxError = Box<dyn std::error::Error + 'static>;

#[derive(Debug, Error)]
pub enum Error {
    /// The tracked function failed.
    #[error("tracked function failed: {0}")]
    Tracked(#[source] BoxError),

    /// The consumer callback failed.
    #[error("consumer callback failed: {0}")]
    Consume(#[source] BoxError),
}

pub type Result<T> = std::result::Result<T, Error>;
