//! Failure classification for page requests

use std::fmt;

/// Why a single page attempt failed.
///
/// Drives the backoff policy: every retryable failure falls in exactly one
/// class. Terminal responses (success, not-found) are not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// Server asked us to slow down (403/429)
    RateLimited,
    /// Any other non-success status
    ServerError,
    /// No response within the per-request ceiling
    Timeout,
    /// Could not reach the peer
    Connection,
    /// 2xx with an unreadable body, or a transport error of no known kind
    Unexpected,
}

impl FailureClass {
    /// Short label used in retry log lines
    pub fn label(self) -> &'static str {
        match self {
            Self::RateLimited => "RATE LIMITED",
            Self::ServerError => "SERVER ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Connection => "CONN ERROR",
            Self::Unexpected => "ERROR",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Error raised before any HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request exceeded the configured timeout
    Timeout(String),
    /// Connection could not be established or was dropped
    Connection(String),
    /// Anything else reqwest reports (body decode, redirect loop, ...)
    Other(String),
}

impl TransportError {
    /// Classify a reqwest error.
    ///
    /// Timeout is checked first: a connect timeout is both, and counts as a
    /// timeout.
    pub fn from_reqwest(e: &reqwest::Error) -> Self {
        let message = e.to_string();
        if e.is_timeout() {
            Self::Timeout(message)
        } else if e.is_connect() {
            Self::Connection(message)
        } else {
            Self::Other(message)
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            Self::Timeout(_) => FailureClass::Timeout,
            Self::Connection(_) => FailureClass::Connection,
            Self::Other(_) => FailureClass::Unexpected,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Timeout(m) | Self::Connection(m) | Self::Other(m) => m,
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(m) => write!(f, "timeout: {m}"),
            Self::Connection(m) => write!(f, "connection error: {m}"),
            Self::Other(m) => write!(f, "transport error: {m}"),
        }
    }
}

impl std::error::Error for TransportError {}
