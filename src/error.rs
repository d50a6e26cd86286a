//! Error types for the acquisition queue.
//!
//! Two classes of failure are kept apart on purpose:
//!
//! - **`AiqError`**: something is actually wrong. Invalid construction
//!   parameters, a producer buffer that does not match the queue's channel
//!   layout, a failed allocation while copying samples, or a configuration /
//!   logging setup failure. Built with `thiserror` so the `?` operator can
//!   carry it up to the CLI, where `anyhow` takes over.
//! - **`Miss`**: the queue is a sliding window, so asking for a time or scan
//!   count it no longer (or does not yet) hold is routine. Queries report this
//!   with a small `Copy` enum that costs nothing to construct and is never
//!   logged above `trace`. Polling consumers treat it as "try again later".

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AiqResult<T> = std::result::Result<T, AiqError>;

/// Failures that indicate a programming, configuration or resource error.
#[derive(Error, Debug)]
pub enum AiqError {
    /// Construction parameters that can never describe a working queue.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Producer handed over fewer samples than `n_whole * n_chans`.
    #[error("Sample buffer holds {actual} samples, expected at least {expected}")]
    ShapeMismatch {
        /// Samples required by the declared scan count.
        expected: usize,
        /// Samples actually supplied.
        actual: usize,
    },

    /// A copy into a new block or flat buffer could not reserve memory.
    #[error("Allocation failed while copying {scans} scans")]
    Allocation {
        /// Number of scans the failed copy was sized for.
        scans: usize,
    },

    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Tracing subscriber could not be installed.
    #[error("Logging setup error: {0}")]
    Logging(String),
}

impl From<figment::Error> for AiqError {
    fn from(err: figment::Error) -> Self {
        AiqError::Figment(Box::new(err))
    }
}

/// Why a query found nothing to return.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Miss {
    /// Nothing has been enqueued yet.
    #[error("queue is empty")]
    Empty,

    /// Requested time or count precedes the oldest retained scan.
    #[error("requested point precedes retained data")]
    TooEarly,

    /// Requested time or count lies beyond the newest retained scan.
    #[error("requested point follows newest data")]
    TooLate,

    /// An exact-length request cannot be satisfied yet.
    #[error("not enough scans available")]
    Insufficient,

    /// The request names a channel (or bit) the stream does not carry.
    #[error("no such channel or bit")]
    NoSuchChannel,
}
