// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI subcommands: `login`, `logout`, `status`, `call`, `keepalive`.

pub mod account;
pub mod call;
pub mod keepalive;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::auth::refresh::Refresher;
use crate::config::SessionConfig;
use crate::lifecycle::SessionLifecycle;
use crate::persist;
use crate::session::TokenStore;

/// Exit code when the user must log in again.
pub const EXIT_RELOGIN: i32 = 3;

#[derive(Debug, Parser)]
#[command(name = "portal", version, about = "Course portal session client")]
pub struct Cli {
    #[command(flatten)]
    pub config: SessionConfig,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and persist the session
    Login {
        #[arg(long, env = "PORTAL_EMAIL")]
        email: String,
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Destroy the persisted session
    Logout,
    /// Show the persisted session
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Make an authorized API call
    Call(call::CallArgs),
    /// Keep the session refreshed until interrupted
    Keepalive,
}

/// Run a parsed command line, returning the process exit code.
pub async fn run(cli: Cli) -> anyhow::Result<i32> {
    let config = cli.config;
    match cli.command {
        Command::Login { email, password } => account::login(&config, &email, &password).await,
        Command::Logout => account::logout(&config).await,
        Command::Status { json } => account::status(&config, json),
        Command::Call(args) => call::run(&config, args).await,
        Command::Keepalive => keepalive::run(&config).await,
    }
}

/// Build a lifecycle over the persisted session (if any).
///
/// Refresh results are written back to the same file.
pub fn open_lifecycle(config: &SessionConfig) -> anyhow::Result<Arc<SessionLifecycle>> {
    let path = config.session_path();
    let store = match persist::load(&path)? {
        Some(session) => TokenStore::with_session(session),
        None => TokenStore::new(),
    };
    Ok(SessionLifecycle::new(
        Arc::new(store),
        Refresher::from_config(config)?,
        config.timings(),
        Some(path),
    ))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
