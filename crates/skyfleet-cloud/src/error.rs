//! Normalized provider error
//!
//! Every adapter maps its native failures into [`ProviderError`], the
//! single error shape that crosses the abstraction boundary. Adapters
//! never swallow a failure into an empty or default result.

use crate::model::ProviderKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by all providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The referenced instance/resource does not exist
    NotFound,
    /// Credentials missing, expired or rejected
    AuthFailed,
    /// Provider throttled the call (retryable)
    RateLimited,
    /// Caller input the provider cannot honor
    InvalidArgument,
    /// Transient provider/transport failure, includes timeouts (retryable)
    Unavailable,
    /// The provider has no implementation for the requested capability
    Unsupported,
}

impl ErrorKind {
    /// Only rate limits and transient unavailability are worth retrying
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorKind::RateLimited | ErrorKind::Unavailable)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AuthFailed => "auth failed",
            ErrorKind::RateLimited => "rate limited",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Unsupported => "unsupported",
        };
        f.write_str(s)
    }
}

/// Normalized failure for any provider operation
///
/// Display shows provider, operation, kind and message; the raw SDK or
/// HTTP error stays in `cause` and only surfaces through the
/// `source()` chain (debug output), never in the default rendering.
#[derive(Error, Debug)]
#[error("{provider} {operation}: {kind}: {message}")]
pub struct ProviderError {
    pub provider: ProviderKind,
    pub operation: &'static str,
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ProviderError {
    pub fn new(
        provider: ProviderKind,
        operation: &'static str,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            operation,
            kind,
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    pub fn not_found(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::NotFound, message)
    }

    pub fn auth_failed(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::AuthFailed, message)
    }

    pub fn rate_limited(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::RateLimited, message)
    }

    pub fn invalid_argument(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::InvalidArgument, message)
    }

    pub fn unavailable(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::Unavailable, message)
    }

    pub fn unsupported(
        provider: ProviderKind,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(provider, operation, ErrorKind::Unsupported, message)
    }

    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;
