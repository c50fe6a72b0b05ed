//! Error types for the netstub engine
//!
//! Transport-level failures, assertion failures and configuration errors each
//! have their own enum; `NetstubError` unifies them for callers that just want
//! to propagate with `?`.

use crate::types::HttpMethod;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Failures surfaced to code under test by the intercepting transports
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The caller cancelled the request before it settled
    #[error("Aborted: {method} {path}")]
    Aborted { method: HttpMethod, path: String },
    /// A route with the network-failure sentinel status, or a rejected deferred body
    #[error("{message}")]
    NetworkFailure { message: String },
    #[error("Invalid request state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
    #[error("No {kind} transport installed")]
    NotInstalled { kind: String },
    /// The task driving a response was cancelled or panicked
    #[error("Request task cancelled: {reason}")]
    Cancelled { reason: String },
}

impl TransportError {
    /// True when the caller cancelled, as opposed to the request failing
    pub fn is_abort(&self) -> bool {
        matches!(self, TransportError::Aborted { .. })
    }

    /// The generic message used for simulated network failures
    pub fn network_failure() -> Self {
        TransportError::NetworkFailure {
            message: "Network Error".to_string(),
        }
    }
}

/// Failures raised by the polling and teardown assertions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssertionError {
    #[error(
        "Timed out after {timeout_ms}ms waiting for {expected} '{event}' events of {method} {path}.\nSaw {}:\n{}",
        .seen.len(),
        .seen.join("\n")
    )]
    Timeout {
        event: String,
        method: HttpMethod,
        path: String,
        expected: usize,
        timeout_ms: u64,
        /// JSON rendering of every matching record observed
        seen: Vec<String>,
    },
    #[error("Mocks never called: {}", .routes.join(", "))]
    PendingMocks { routes: Vec<String> },
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration loading error: {0}")]
    Loading(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Configuration serialization error: {0}")]
    Serialization(String),
}

// ----------------------------------------------------------------------------
// Top-level Error
// ----------------------------------------------------------------------------

/// Core error type for the netstub engine
#[derive(Debug, thiserror::Error)]
pub enum NetstubError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Assertion failed: {0}")]
    Assertion(#[from] AssertionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported HTTP method: {method}")]
    InvalidMethod { method: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NetstubError {
    /// Create an invalid-method error
    pub fn invalid_method<T: Into<String>>(method: T) -> Self {
        NetstubError::InvalidMethod {
            method: method.into(),
        }
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, NetstubError>;
pub type NetstubResult<T> = Result<T>;
