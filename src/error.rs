//! Unified error types for Tally.
//!
//! The aggregation core reports three kinds of failure to its caller:
//! malformed payloads ([`TallyError::Decode`]), sums that would leave the
//! u64 range ([`TallyError::Overflow`]) and internal faults while touching
//! the store ([`TallyError::Aggregation`]). None of them leave an
//! accumulator partially updated. The remaining variants belong to the
//! host (config loading, input files, output serialization).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for Tally operations.
#[derive(Error, Debug)]
pub enum TallyError {
    /// The payload was not a well-formed event.
    #[error("invalid event payload: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
    },

    /// Adding the amount would overflow the action's running total.
    #[error(
        "adding {amount} to action {action:?} would overflow its running total of {current_sum}"
    )]
    Overflow {
        action: String,
        amount: u64,
        current_sum: u64,
    },

    /// An unexpected fault inside the store (poisoned lock, broken invariant).
    #[error("aggregation error: {message}")]
    Aggregation { message: String },

    /// Serialization of an export failed.
    #[error("serialization error: {message}")]
    Serde { message: String },

    /// Configuration loading errors.
    #[error("config error: {message}")]
    Config { message: String },

    /// I/O errors from reading config or input files.
    #[error("storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A specialized Result type for Tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;

impl TallyError {
    /// Create a decode error from a JSON parse failure.
    pub fn decode(source: serde_json::Error) -> Self {
        Self::Decode { source }
    }

    /// Create an overflow error.
    pub fn overflow(action: impl Into<String>, amount: u64, current_sum: u64) -> Self {
        Self::Overflow {
            action: action.into(),
            amount,
            current_sum,
        }
    }

    /// Create an aggregation error.
    pub fn aggregation(message: impl Into<String>) -> Self {
        Self::Aggregation {
            message: message.into(),
        }
    }

    /// Create a serialization error.
    pub fn serde(message: impl Into<String>) -> Self {
        Self::Serde {
            message: message.into(),
        }
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a storage error from an I/O error.
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    /// Stable label for this error, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode",
            Self::Overflow { .. } => "overflow",
            Self::Aggregation { .. } => "aggregation",
            Self::Serde { .. } => "serde",
            Self::Config { .. } => "config",
            Self::Storage { .. } => "storage",
        }
    }

    /// Whether the caller can drop the offending event and keep going.
    ///
    /// Decode and overflow failures only concern a single event. Everything
    /// else points at the store or the host environment.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::Overflow { .. })
    }
}

impl From<io::Error> for TallyError {
    fn from(err: io::Error) -> Self {
        Self::Storage {
            path: PathBuf::new(),
            source: err,
        }
    }
}

/// Trait for fail-open error handling in the host.
///
/// Logs the error as a warning and substitutes a fallback. The aggregation
/// core never uses this; its errors always reach the caller.
pub trait FailOpen<T> {
    /// Handle an error by logging a warning and returning the default value.
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default;

    /// Handle an error by logging a warning and returning the provided fallback.
    fn fail_open_with(self, context: &str, fallback: T) -> T;
}

impl<T> FailOpen<T> for Result<T> {
    fn fail_open_default(self, context: &str) -> T
    where
        T: Default,
    {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (using default)", context, err);
                T::default()
            }
        }
    }

    fn fail_open_with(self, context: &str, fallback: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("{}: {} (using fallback)", context, err);
                fallback
            }
        }
    }
}

/// Exit codes for the `tally` binary.
pub mod exit_codes {
    /// Every event was accepted.
    pub const SUCCESS: i32 = 0;

    /// At least one event was rejected; the rest were aggregated.
    pub const REJECTED: i32 = 1;

    /// The run could not complete (unreadable input, export fault).
    pub const ERROR: i32 = 2;

    /// The process panicked.
    pub const CRASH: i32 = 3;
}
