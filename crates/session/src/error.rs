// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by login, refresh, and authorized calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthenticated,
    RefreshFailed,
    AuthenticationFailed,
    Network,
    BadRequest,
    Internal,
}

impl ErrorCode {
    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unauthenticated => 3,
            Self::RefreshFailed => 3,
            Self::AuthenticationFailed => 3,
            Self::Network => 1,
            Self::BadRequest => 2,
            Self::Internal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::RefreshFailed => "REFRESH_FAILED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::Network => "NETWORK",
            Self::BadRequest => "BAD_REQUEST",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the caller must log in again to recover.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::RefreshFailed | Self::AuthenticationFailed)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a refresh-token exchange.
///
/// Cloneable so that every caller joined on one in-flight refresh observes
/// the same outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// No session is held.
    NoSession,
    /// The session already carries the terminal refresh error marker.
    Invalidated,
    /// The refresh endpoint answered with a non-success status.
    Rejected { status: u16, body: String },
    /// The refresh endpoint answered 2xx with an unusable body.
    Malformed(String),
    /// Transport failure talking to the refresh endpoint.
    Network(String),
    /// The refresh call exceeded the configured timeout.
    Timeout { after_ms: u64 },
    /// The refresh task ended without producing a result.
    Aborted(String),
}

impl RefreshError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoSession | Self::Invalidated => ErrorCode::Unauthenticated,
            Self::Network(_) | Self::Timeout { .. } => ErrorCode::Network,
            Self::Rejected { .. } | Self::Malformed(_) => ErrorCode::RefreshFailed,
            Self::Aborted(_) => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSession => f.write_str("no session"),
            Self::Invalidated => f.write_str("session invalidated by a failed refresh"),
            Self::Rejected { status, body } => write!(f, "refresh rejected ({status}): {body}"),
            Self::Malformed(msg) => write!(f, "malformed refresh response: {msg}"),
            Self::Network(msg) => write!(f, "refresh transport error: {msg}"),
            Self::Timeout { after_ms } => write!(f, "refresh timed out after {after_ms}ms"),
            Self::Aborted(msg) => write!(f, "refresh aborted: {msg}"),
        }
    }
}

impl std::error::Error for RefreshError {}

/// Failure of a credential exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginError {
    Rejected { status: u16, body: String },
    Malformed(String),
    Network(String),
}

impl LoginError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rejected { .. } => ErrorCode::Unauthenticated,
            Self::Malformed(_) => ErrorCode::Internal,
            Self::Network(_) => ErrorCode::Network,
        }
    }
}

impl fmt::Display for LoginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { status, body } => write!(f, "login rejected ({status}): {body}"),
            Self::Malformed(msg) => write!(f, "malformed login response: {msg}"),
            Self::Network(msg) => write!(f, "login transport error: {msg}"),
        }
    }
}

impl std::error::Error for LoginError {}

/// Failure of an authorized API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No usable session or access token.
    Unauthenticated,
    /// Still unauthorized after a refresh, or the refresh itself failed.
    AuthenticationFailed(String),
    /// Transport failure.
    Network(String),
    /// The request could not be built (bad URL or header).
    BadRequest(String),
}

impl CallError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Unauthenticated => ErrorCode::Unauthenticated,
            Self::AuthenticationFailed(_) => ErrorCode::AuthenticationFailed,
            Self::Network(_) => ErrorCode::Network,
            Self::BadRequest(_) => ErrorCode::BadRequest,
        }
    }
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unauthenticated => f.write_str("no access token available"),
            Self::AuthenticationFailed(msg) => write!(f, "authentication failed: {msg}"),
            Self::Network(msg) => write!(f, "request failed: {msg}"),
            Self::BadRequest(msg) => write!(f, "bad request: {msg}"),
        }
    }
}

impl std::error::Error for CallError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
