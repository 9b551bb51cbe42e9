//! Backend error type shared by drivers, sessions and database handles.

use thiserror::Error;

use crate::codes::{ErrorCategory, ErrorCode};

/// An error reported by the backend (or by a driver talking to it).
///
/// Categories are resolved from the code table when the error is built, so
/// callers can classify without another lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code} ({raw_code}): {message}")]
pub struct BackendError {
    code: ErrorCode,
    raw_code: i32,
    message: String,
    categories: ErrorCategory,
}

/// A type alias for `Result<T, BackendError>`.
pub type BackendResult<T> = Result<T, BackendError>;

impl BackendError {
    /// Build an error for a known code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            raw_code: code.value(),
            message: message.into(),
            categories: code.categories(),
        }
    }

    /// Build an error from a numeric code as seen on the wire.
    ///
    /// Codes missing from the table map to [`ErrorCode::UnknownError`] while
    /// the raw value is preserved for reporting.
    pub fn from_raw(raw_code: i32, message: impl Into<String>) -> Self {
        let code = ErrorCode::from_i32(raw_code).unwrap_or(ErrorCode::UnknownError);
        Self {
            code,
            raw_code,
            message: message.into(),
            categories: code.categories(),
        }
    }

    /// The typed error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// The numeric code as received.
    pub fn raw_code(&self) -> i32 {
        self.raw_code
    }

    /// Human readable message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Category flags resolved at construction.
    pub fn categories(&self) -> ErrorCategory {
        self.categories
    }

    /// Whether an operation failing with this error may succeed when retried.
    ///
    /// Network blips, primary changes, stale routing and shutdown of the
    /// target node are transient from a client's point of view.
    pub fn is_retryable(&self) -> bool {
        self.categories.intersects(
            ErrorCategory::NETWORK
                | ErrorCategory::NOT_PRIMARY
                | ErrorCategory::STALE_SHARDING
                | ErrorCategory::SHUTDOWN,
        )
    }
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        let code = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorCode::NetworkTimeout,
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => {
                ErrorCode::HostUnreachable
            }
            _ => ErrorCode::SocketException,
        };
        BackendError::new(code, err.to_string())
    }
}
