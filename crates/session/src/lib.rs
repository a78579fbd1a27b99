// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Self-refreshing bearer-token session for the course portal API.

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod gate;
pub mod lifecycle;
pub mod persist;
pub mod request;
pub mod session;
pub mod test_support;

use std::sync::Once;
use std::time::Duration;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the ring rustls provider (reqwest needs one even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// HTTP client with a per-request timeout.
pub fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    ensure_crypto_provider();
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}
