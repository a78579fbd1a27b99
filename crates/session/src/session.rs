// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session data and the token store that owns it.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Marker set on a session whose refresh failed terminally.
pub const REFRESH_ERROR_MARKER: &str = "RefreshAccessTokenError";

/// Portal role of the authenticated user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Student,
    Instructor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Instructor => "instructor",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "instructor" => Ok(Self::Instructor),
            other => anyhow::bail!("unknown role: {other}"),
        }
    }
}

/// The authenticated identity for one client context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub role: Role,
    pub access_token: String,
    pub refresh_token: String,
    /// Expiry of `access_token` as epoch millis.
    pub access_token_expires_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Session {
    /// True once a refresh has failed terminally.
    pub fn is_invalid(&self) -> bool {
        self.error.is_some()
    }

    /// Whether the access token is usable for at least `skew` beyond `now_ms`.
    pub fn is_fresh_at(&self, now_ms: u64, skew: Duration) -> bool {
        if self.is_invalid() {
            return false;
        }
        let skew_ms = u64::try_from(skew.as_millis()).unwrap_or(u64::MAX);
        now_ms < self.access_token_expires_at.saturating_sub(skew_ms)
    }

    pub fn is_fresh(&self, skew: Duration) -> bool {
        self.is_fresh_at(epoch_ms(), skew)
    }

    /// Milliseconds until the access token expires (zero once expired).
    pub fn expires_in_ms(&self) -> u64 {
        self.access_token_expires_at.saturating_sub(epoch_ms())
    }

    /// Apply the result of a successful refresh.
    ///
    /// The refresh token is only replaced when the endpoint issued a new one.
    pub fn with_refreshed(
        &self,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: u64,
    ) -> Self {
        Self {
            access_token,
            refresh_token: refresh_token.unwrap_or_else(|| self.refresh_token.clone()),
            access_token_expires_at: expires_at,
            error: None,
            ..self.clone()
        }
    }

    /// Copy of this session carrying the terminal refresh error marker.
    pub fn invalidated(&self) -> Self {
        Self { error: Some(REFRESH_ERROR_MARKER.to_owned()), ..self.clone() }
    }
}

/// Holder of the current session.
///
/// Every write swaps the whole `Arc<Session>`, so readers observe either the
/// previous or the next session, never a mix.
#[derive(Debug, Default)]
pub struct TokenStore {
    inner: RwLock<Option<Arc<Session>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self { inner: RwLock::new(Some(Arc::new(session))) }
    }

    pub fn get(&self) -> Option<Arc<Session>> {
        self.inner.read().clone()
    }

    pub fn set(&self, session: Session) {
        *self.inner.write() = Some(Arc::new(session));
    }

    /// Remove the session, returning what was held.
    pub fn clear(&self) -> Option<Arc<Session>> {
        self.inner.write().take()
    }

    /// Remove the session only if `current` is still the held one.
    pub fn clear_if(&self, current: &Session) -> bool {
        let mut guard = self.inner.write();
        if guard.as_deref() == Some(current) {
            *guard = None;
            true
        } else {
            false
        }
    }

    /// Replace the session only if `current` still matches the held one.
    ///
    /// Returns false (and leaves the store untouched) if the session was
    /// cleared or replaced in the meantime.
    pub fn replace_if(&self, current: &Session, next: Session) -> bool {
        let mut guard = self.inner.write();
        match guard.as_deref() {
            Some(held) if held == current => {
                *guard = Some(Arc::new(next));
                true
            }
            _ => false,
        }
    }

    /// Fresh means `now < expires_at - skew`; an invalid session never is.
    pub fn is_fresh(&self, skew: Duration) -> bool {
        self.inner.read().as_ref().is_some_and(|s| s.is_fresh(skew))
    }

    /// Access token of a usable (not invalidated) session.
    pub fn bearer(&self) -> Option<String> {
        let guard = self.inner.read();
        let session = guard.as_ref()?;
        if session.is_invalid() || session.access_token.is_empty() {
            return None;
        }
        Some(session.access_token.clone())
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Epoch millis `ttl` from now.
pub fn expires_after(ttl: Duration) -> u64 {
    epoch_ms().saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
