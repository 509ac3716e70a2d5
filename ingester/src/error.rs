//! Error and Result types for the ingester.

use tephra_tsdb::TsdbError;

/// Error type for ingester operations, classified by how the caller should
/// react.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    /// The request itself is wrong: missing tenant, malformed matcher,
    /// rejected sample. Not retryable.
    InvalidRequest(String),
    /// The ingester is shutting down; retry against another replica.
    Unavailable(String),
    /// A transient storage failure; retryable.
    Transient(String),
    /// Opening a tenant database failed; operator attention required.
    Fatal(String),
    /// The request was cancelled before completing.
    Cancelled,
}

impl std::error::Error for IngestError {}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            IngestError::InvalidRequest(msg) => write!(f, "invalid request: {}", msg),
            IngestError::Unavailable(msg) => write!(f, "unavailable: {}", msg),
            IngestError::Transient(msg) => write!(f, "transient error: {}", msg),
            IngestError::Fatal(msg) => write!(f, "fatal error: {}", msg),
            IngestError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl From<TsdbError> for IngestError {
    fn from(err: TsdbError) -> Self {
        match err {
            TsdbError::InvalidInput(msg) => IngestError::InvalidRequest(msg),
            TsdbError::SeriesLimitExceeded { limit } => IngestError::InvalidRequest(format!(
                "per-tenant series limit of {} exceeded",
                limit
            )),
            TsdbError::Closed => IngestError::Unavailable("tenant store is closed".to_string()),
            TsdbError::Encoding(msg) | TsdbError::Storage(msg) => IngestError::Transient(msg),
        }
    }
}

/// Result type alias for ingester operations.
pub type Result<T> = std::result::Result<T, IngestError>;
