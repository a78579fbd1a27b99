// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Refresh-token exchange.

use std::time::Duration;

use crate::auth::{RefreshRequest, RefreshResponse};
use crate::config::{SessionConfig, Timings};
use crate::error::RefreshError;
use crate::session::expires_after;

/// Tokens minted by a successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present only when the endpoint rotated the refresh token.
    pub refresh_token: Option<String>,
    /// Epoch millis.
    pub expires_at: u64,
}

/// Exchanges refresh tokens at the backend's refresh endpoint.
///
/// Holds no session state; the caller commits the result.
#[derive(Debug, Clone)]
pub struct Refresher {
    http: reqwest::Client,
    endpoint: String,
    token_ttl: Duration,
    timeout: Duration,
}

impl Refresher {
    pub fn new(endpoint: impl Into<String>, timings: Timings) -> anyhow::Result<Self> {
        let http = crate::http_client(timings.refresh_timeout)?;
        Ok(Self::with_client(http, endpoint, timings))
    }

    pub fn from_config(config: &SessionConfig) -> anyhow::Result<Self> {
        Self::new(config.refresh_url(), config.timings())
    }

    pub fn with_client(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        timings: Timings,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            token_ttl: timings.token_ttl,
            timeout: timings.refresh_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Perform a single refresh request.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        let request = self.http.post(&self.endpoint).json(&RefreshRequest { refresh_token });
        let resp = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| self.timed_out())?
            .map_err(|e| self.transport_error(e))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(RefreshError::Rejected { status: status.as_u16(), body });
        }

        let token: RefreshResponse =
            serde_json::from_str(&body).map_err(|e| RefreshError::Malformed(e.to_string()))?;
        let token = token.validate().map_err(RefreshError::Malformed)?;

        Ok(RefreshedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: expires_after(self.token_ttl),
        })
    }

    fn timed_out(&self) -> RefreshError {
        let after_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        RefreshError::Timeout { after_ms }
    }

    fn transport_error(&self, e: reqwest::Error) -> RefreshError {
        if e.is_timeout() {
            self.timed_out()
        } else {
            RefreshError::Network(e.to_string())
        }
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
