// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `portal login`, `portal logout`, `portal status`.

use serde::Serialize;

use crate::auth;
use crate::command::{open_lifecycle, EXIT_RELOGIN};
use crate::config::SessionConfig;
use crate::lifecycle::SessionState;
use crate::persist;
use crate::session::Role;

pub async fn login(config: &SessionConfig, email: &str, password: &str) -> anyhow::Result<i32> {
    let http = crate::http_client(config.request_timeout())?;
    let ttl = config.timings().token_ttl;
    let session = match auth::login::login(&http, &config.login_url(), ttl, email, password).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(e.code().exit_code());
        }
    };

    let path = config.session_path();
    let _lock = persist::lock_async(path.clone()).await?;
    persist::save(&path, &session)?;
    println!("Logged in as {} ({})", session.email, session.role);
    Ok(0)
}

pub async fn logout(config: &SessionConfig) -> anyhow::Result<i32> {
    let lifecycle = open_lifecycle(config)?;
    match lifecycle.logout().await {
        Some(session) => println!("Logged out {}", session.email),
        None => println!("Not logged in"),
    }
    Ok(0)
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusReport {
    pub fn exit_code(&self) -> i32 {
        match self.state {
            SessionState::SignedOut | SessionState::Invalid => EXIT_RELOGIN,
            _ => 0,
        }
    }
}

/// Describe the persisted session without refreshing it.
pub fn report(config: &SessionConfig) -> anyhow::Result<StatusReport> {
    let lifecycle = open_lifecycle(config)?;
    let state = lifecycle.state();
    let session = lifecycle.store().get();
    Ok(StatusReport {
        state,
        user_id: session.as_ref().map(|s| s.user_id.clone()),
        email: session.as_ref().map(|s| s.email.clone()),
        role: session.as_ref().map(|s| s.role),
        expires_in_ms: session.as_ref().map(|s| s.expires_in_ms()),
        error: session.as_ref().and_then(|s| s.error.clone()),
    })
}

pub fn status(config: &SessionConfig, json: bool) -> anyhow::Result<i32> {
    let report = report(config)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(report.exit_code());
    }

    match (&report.email, &report.role) {
        (Some(email), Some(role)) => {
            println!("{email} ({role})");
            println!("  state:      {}", state_label(report.state));
            if let Some(ms) = report.expires_in_ms {
                println!("  expires in: {}m {:02}s", ms / 60_000, (ms / 1000) % 60);
            }
            if report.state == SessionState::Invalid {
                println!("  session expired, run `portal login`");
            }
        }
        _ => println!("Not logged in"),
    }
    Ok(report.exit_code())
}

fn state_label(state: SessionState) -> &'static str {
    match state {
        SessionState::SignedOut => "signed out",
        SessionState::ValidFresh => "valid",
        SessionState::ValidStale => "valid (refresh due)",
        SessionState::Refreshing => "refreshing",
        SessionState::Invalid => "invalid",
    }
}
