//! Error types for the reactive runtime.
//!
//! Failures inside user bodies (effects, getters, watch callbacks) are
//! panics and are never wrapped here; they unwind through `run`/`trigger`
//! to whoever caused the run. This enum only covers misuse the runtime can
//! detect and report.

use thiserror::Error;

use crate::reactive::SubscriberId;

/// Errors reported by the fallible `try_*` APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// The runtime that owns this handle has been dropped.
    #[error("reactive runtime has been dropped")]
    RuntimeDropped,

    /// The computation was disposed and no longer tracks dependencies.
    #[error("computation {0} has been disposed")]
    Disposed(SubscriberId),

    /// A JSON document could not be turned into reactive objects.
    #[error("unsupported JSON value: {0}")]
    UnsupportedJson(&'static str),

    /// Watch options could not be parsed.
    #[error("invalid watch options: {0}")]
    InvalidOptions(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
