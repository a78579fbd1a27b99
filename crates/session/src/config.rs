// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the portal session layer.
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the backend API.
    #[arg(long, default_value = "http://localhost:3000", env = "PORTAL_API_URL")]
    pub api_url: String,

    /// Lifetime assumed for each issued access token, in milliseconds.
    #[arg(long, default_value_t = 300_000, env = "PORTAL_TOKEN_TTL_MS")]
    pub token_ttl_ms: u64,

    /// Margin before expiry at which a token counts as stale, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "PORTAL_REFRESH_SKEW_MS")]
    pub refresh_skew_ms: u64,

    /// Background refresh timer interval in milliseconds.
    #[arg(long, default_value_t = 240_000, env = "PORTAL_REFRESH_INTERVAL_MS")]
    pub refresh_interval_ms: u64,

    /// Timeout for the refresh-token exchange in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "PORTAL_REFRESH_TIMEOUT_MS")]
    pub refresh_timeout_ms: u64,

    /// Timeout for login and authorized API calls in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "PORTAL_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Directory holding the persisted session.
    #[arg(long, env = "PORTAL_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Log format (json or text).
    #[arg(long, env = "PORTAL_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "PORTAL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,
}

impl SessionConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| anyhow::anyhow!("invalid --api-url {}: {e}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("--api-url must be http or https, got {}", url.scheme());
        }
        if self.token_ttl_ms == 0 {
            anyhow::bail!("--token-ttl-ms must be greater than zero");
        }
        if self.refresh_skew_ms >= self.token_ttl_ms {
            anyhow::bail!("--refresh-skew-ms must be shorter than --token-ttl-ms");
        }
        if self.refresh_interval_ms == 0 || self.refresh_interval_ms >= self.token_ttl_ms {
            anyhow::bail!("--refresh-interval-ms must be between zero and --token-ttl-ms");
        }
        if self.refresh_timeout_ms == 0 || self.request_timeout_ms == 0 {
            anyhow::bail!("timeouts must be greater than zero");
        }
        match self.log_format.as_str() {
            "json" | "text" => Ok(()),
            other => anyhow::bail!("invalid --log-format: {other}"),
        }
    }

    /// API base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_url.trim_end_matches('/')
    }

    pub fn login_url(&self) -> String {
        format!("{}/api/login", self.base_url())
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/api/token/refresh/", self.base_url())
    }

    pub fn timings(&self) -> Timings {
        Timings {
            token_ttl: Duration::from_millis(self.token_ttl_ms),
            refresh_skew: Duration::from_millis(self.refresh_skew_ms),
            refresh_interval: Duration::from_millis(self.refresh_interval_ms),
            refresh_timeout: Duration::from_millis(self.refresh_timeout_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve the state directory.
    ///
    /// Checks `--state-dir`/`PORTAL_STATE_DIR`, then `$XDG_STATE_HOME/portal`,
    /// then `$HOME/.local/state/portal`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("portal");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/portal");
        }
        PathBuf::from(".portal")
    }

    pub fn session_path(&self) -> PathBuf {
        self.state_dir().join("session.json")
    }
}

/// Token and refresh timings derived from [`SessionConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub token_ttl: Duration,
    pub refresh_skew: Duration,
    pub refresh_interval: Duration,
    pub refresh_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(5 * 60),
            refresh_skew: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(4 * 60),
            refresh_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
