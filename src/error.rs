//! Error types for the odds scanner

use thiserror::Error;

/// Failures surfaced by the odds provider client
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("rate limited by provider (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("provider rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("provider rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl ClientError {
    /// Whether the request may succeed if repeated after a delay
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::RateLimited { .. } | ClientError::Unavailable(_)
        )
    }

    /// Ordering used to pick the error reported when every sport failed
    pub(crate) fn severity(&self) -> u8 {
        match self {
            ClientError::Unauthorized { .. } => 4,
            ClientError::RateLimited { .. } => 3,
            ClientError::Unavailable(_) => 2,
            ClientError::Rejected { .. } => 1,
            ClientError::MalformedResponse(_) => 0,
        }
    }
}

/// Payload whose top-level shape the normalizer cannot map
#[derive(Error, Debug, Clone, PartialEq)]
#[error("unrecognized payload schema: {0}")]
pub struct SchemaError(pub String);

/// Alert could not be delivered to the messaging channel
#[derive(Error, Debug, Clone, PartialEq)]
#[error("alert delivery failed: {0}")]
pub struct DeliveryFailed(pub String);

/// How the scheduler reacts to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff
    Transient,
    /// Skipped and logged, the cycle continues
    DataQuality,
    /// Retried on the next cycle, nothing recorded
    DeliveryFailure,
    /// Scheduler stops and the operator must intervene
    Fatal,
}

/// Main error type for the scanner
#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Delivery(#[from] DeliveryFailed),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("scanner stopped: {0}")]
    Stopped(String),
}

impl ScanError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ScanError::Client(e) => match e {
                ClientError::RateLimited { .. } | ClientError::Unavailable(_) => {
                    ErrorClass::Transient
                }
                ClientError::MalformedResponse(_) | ClientError::Rejected { .. } => {
                    ErrorClass::DataQuality
                }
                ClientError::Unauthorized { .. } => ErrorClass::Fatal,
            },
            ScanError::Schema(_) => ErrorClass::DataQuality,
            ScanError::Delivery(_) => ErrorClass::DeliveryFailure,
            ScanError::Database(_) | ScanError::Http(_) | ScanError::Io(_) => {
                ErrorClass::Transient
            }
            ScanError::Json(_) => ErrorClass::DataQuality,
            ScanError::Config(_) | ScanError::Stopped(_) => ErrorClass::Fatal,
        }
    }
}

impl From<config::ConfigError> for ScanError {
    fn from(e: config::ConfigError) -> Self {
        ScanError::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
