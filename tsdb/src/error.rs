//! Error and Result types for the TSDB engine.

/// Error type for TSDB operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsdbError {
    /// Invalid input or parameter errors (bad labels, negative or
    /// out-of-order timestamps, malformed matchers).
    InvalidInput(String),
    /// Encoding/decoding errors for chunk or block payloads.
    Encoding(String),
    /// Errors from the underlying filesystem.
    Storage(String),
    /// The per-tenant series limit would be exceeded.
    SeriesLimitExceeded { limit: usize },
    /// The database has been closed; no further operations are accepted.
    Closed,
}

impl std::error::Error for TsdbError {}

impl std::fmt::Display for TsdbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TsdbError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            TsdbError::Encoding(msg) => write!(f, "encoding error: {}", msg),
            TsdbError::Storage(msg) => write!(f, "storage error: {}", msg),
            TsdbError::SeriesLimitExceeded { limit } => {
                write!(f, "per-tenant series limit of {} exceeded", limit)
            }
            TsdbError::Closed => write!(f, "tsdb is closed"),
        }
    }
}

impl From<std::io::Error> for TsdbError {
    fn from(err: std::io::Error) -> Self {
        TsdbError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for TsdbError {
    fn from(err: serde_json::Error) -> Self {
        TsdbError::Encoding(err.to_string())
    }
}

/// Result type alias for TSDB operations.
pub type Result<T> = std::result::Result<T, TsdbError>;
