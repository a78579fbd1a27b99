// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential exchange.

use std::time::Duration;

use crate::auth::{LoginRequest, LoginResponse};
use crate::error::LoginError;
use crate::session::{expires_after, Session};

/// Exchange email/password for a new session.
///
/// The access token's expiry is `now + token_ttl`; the backend does not
/// report one.
pub async fn login(
    http: &reqwest::Client,
    login_url: &str,
    token_ttl: Duration,
    email: &str,
    password: &str,
) -> Result<Session, LoginError> {
    let resp = http
        .post(login_url)
        .json(&LoginRequest { email, password })
        .send()
        .await
        .map_err(|e| LoginError::Network(e.to_string()))?;

    let status = resp.status();
    let body = resp.text().await.map_err(|e| LoginError::Network(e.to_string()))?;
    if !status.is_success() {
        return Err(LoginError::Rejected { status: status.as_u16(), body });
    }

    let data: LoginResponse =
        serde_json::from_str(&body).map_err(|e| LoginError::Malformed(e.to_string()))?;
    let data = data.validate().map_err(LoginError::Malformed)?;

    tracing::info!(user_id = %data.user.id, role = %data.user.role, "logged in");
    Ok(Session {
        user_id: data.user.id,
        email: if data.user.email.is_empty() { email.to_owned() } else { data.user.email },
        username: data.user.username,
        role: data.user.role,
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        access_token_expires_at: expires_after(token_ttl),
        error: None,
    })
}

#[cfg(test)]
#[path = "login_tests.rs"]
mod tests;
