//! Error taxonomy shared by the OAuth, platform, dispatch, and session layers.
//!
//! Every failure that can reach a client is a [`BridgeError`] carrying one
//! [`ErrorKind`]. The kind name is what goes on the wire (`"kind": "RateLimited"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Closed set of failure kinds reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// OAuth state token unknown, already consumed, or expired
    InvalidState,
    /// Platform rejected the authorization code
    ExchangeFailed,
    /// No stored credential for the local user
    NoCredential,
    /// Platform rejected the refresh token; authorization must be re-run
    RefreshFailed,
    /// Platform (or local throttle) asked us to slow down
    RateLimited,
    /// Network failure or platform 5xx; retryable
    Transient,
    /// Platform rejected the access token
    AuthRejected,
    /// Arguments failed validation, locally or at the platform
    InvalidArgument,
    /// Tool name not in the registry
    UnknownTool,
    /// Session credential missing/invalid, or token rejected after a forced refresh
    Unauthenticated,
    /// Storage or decoding failure outside the taxonomy above
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidState => "InvalidState",
            Self::ExchangeFailed => "ExchangeFailed",
            Self::NoCredential => "NoCredential",
            Self::RefreshFailed => "RefreshFailed",
            Self::RateLimited => "RateLimited",
            Self::Transient => "Transient",
            Self::AuthRejected => "AuthRejected",
            Self::InvalidArgument => "InvalidArgument",
            Self::UnknownTool => "UnknownTool",
            Self::Unauthenticated => "Unauthenticated",
            Self::Internal => "Internal",
        }
    }

    /// Kinds the platform client retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::RateLimited)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with a human-readable message.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Server-requested delay, only meaningful for `RateLimited`
    pub retry_after: Option<Duration>,
}

impl BridgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::RateLimited,
            message: message.into(),
            retry_after,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

/// Infrastructure failures (storage, I/O) surface as `Internal`.
impl From<anyhow::Error> for BridgeError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal(format!("{:#}", err))
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
