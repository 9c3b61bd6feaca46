//! Error types for the block storage client.
//!
//! # Design
//! Every public operation returns `ApiError`. Each variant names the
//! operation that failed (e.g. `"create_volume"`) so logs can attribute a
//! failure to an endpoint without parsing message text. `kind()` collapses
//! the variants into the small `ErrorKind` taxonomy callers branch on.
//!
//! Local failures (`Validation`, `UrlResolution`) never reach the network.
//! `Http` keeps the server's trace id and raw body verbatim so operators can
//! correlate a client-side failure with server logs.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Coarse classification of an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    UrlResolution,
    Authentication,
    Transport,
    Http,
    Decode,
    Timeout,
    Cancelled,
}

/// Errors returned by `StorageClient` operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request was rejected locally before any I/O.
    #[error("{operation}: invalid request: {source}")]
    Validation {
        operation: &'static str,
        #[source]
        source: ValidationError,
    },

    /// The configured service URL (or a path joined onto it) is not a valid URL.
    #[error("{operation}: cannot resolve service URL '{url}': {message}")]
    UrlResolution {
        operation: &'static str,
        url: String,
        message: String,
    },

    /// The authenticator refused to decorate the request.
    #[error("{operation}: authentication failed: {source}")]
    Authentication {
        operation: &'static str,
        #[source]
        source: AuthError,
    },

    /// The request never produced an HTTP response.
    #[error("{operation}: transport failure: {source}")]
    Transport {
        operation: &'static str,
        #[source]
        source: TransportError,
    },

    /// The server answered with a status code of 300 or above.
    #[error("{operation}: HTTP {status}: {message}")]
    Http {
        operation: &'static str,
        status: u16,
        message: String,
        trace: Option<String>,
        errors: Vec<ServiceErrorDetail>,
        body: String,
    },

    /// The response body could not be turned into the expected shape.
    #[error("{operation}: could not decode response: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    /// The caller's deadline expired before a response arrived.
    #[error("{operation}: deadline exceeded after {elapsed:?}")]
    Timeout {
        operation: &'static str,
        elapsed: Duration,
    },

    /// The caller's cancellation token fired.
    #[error("{operation}: request cancelled")]
    Cancelled { operation: &'static str },
}

impl ApiError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Validation { .. } => ErrorKind::Validation,
            ApiError::UrlResolution { .. } => ErrorKind::UrlResolution,
            ApiError::Authentication { .. } => ErrorKind::Authentication,
            ApiError::Transport { .. } => ErrorKind::Transport,
            ApiError::Http { .. } => ErrorKind::Http,
            ApiError::Decode { .. } => ErrorKind::Decode,
            ApiError::Timeout { .. } => ErrorKind::Timeout,
            ApiError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Identifier of the operation that failed.
    pub fn operation(&self) -> &'static str {
        match self {
            ApiError::Validation { operation, .. }
            | ApiError::UrlResolution { operation, .. }
            | ApiError::Authentication { operation, .. }
            | ApiError::Transport { operation, .. }
            | ApiError::Http { operation, .. }
            | ApiError::Decode { operation, .. }
            | ApiError::Timeout { operation, .. }
            | ApiError::Cancelled { operation } => operation,
        }
    }

    /// HTTP status code, for `Http` errors only.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-supplied trace id, for `Http` errors only.
    pub fn trace(&self) -> Option<&str> {
        match self {
            ApiError::Http { trace, .. } => trace.as_deref(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    pub(crate) fn validation(operation: &'static str, source: ValidationError) -> Self {
        ApiError::Validation { operation, source }
    }

    pub(crate) fn decode(operation: &'static str, message: impl Into<String>) -> Self {
        ApiError::Decode {
            operation,
            message: message.into(),
        }
    }
}

/// Reasons a request is rejected before it is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("path parameter '{name}' is missing or empty")]
    MissingPathParameter { name: String },

    #[error("malformed path template '{template}'")]
    MalformedPathTemplate { template: String },

    #[error("required field '{field}' is missing or empty")]
    MissingField { field: &'static str },

    #[error("field '{field}' is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("request body could not be serialized: {0}")]
    Serialization(String),
}

/// Failures below the HTTP layer: nothing was received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("request could not be assembled: {0}")]
    Request(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Connection-level failures may succeed on a fresh attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout(_) | TransportError::Connect(_) | TransportError::Io(_)
        )
    }
}

/// Error raised by an `Authenticator`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct AuthError(pub String);

/// One entry of the service's `errors` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub more_info: Option<String>,
}

/// Error payload shape used by the service: `{"errors": [...], "trace": "..."}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ServiceErrorBody {
    #[serde(default)]
    pub errors: Vec<ServiceErrorDetail>,
    #[serde(default)]
    pub trace: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ServiceErrorBody {
    /// Best human-readable message the payload offers.
    pub fn summary(&self) -> Option<String> {
        let joined: Vec<&str> = self
            .errors
            .iter()
            .filter_map(|e| e.message.as_deref())
            .collect();
        if !joined.is_empty() {
            return Some(joined.join("; "));
        }
        self.message.clone().or_else(|| self.error.clone())
    }
}
