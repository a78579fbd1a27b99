// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `portal call`: one authorized request, body printed to stdout.

use std::io::Write;

use clap::Args;
use reqwest::Method;

use crate::command::{open_lifecycle, EXIT_RELOGIN};
use crate::config::SessionConfig;
use crate::error::{CallError, RefreshError};
use crate::request::{AuthorizedClient, RequestOptions};

#[derive(Debug, Clone, Args)]
pub struct CallArgs {
    /// Absolute URL, or a `/path` relative to the API base URL
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long = "request", default_value = "GET")]
    pub method: String,

    /// Request body
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    /// Extra header as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,
}

impl CallArgs {
    /// Turn the arguments into request options.
    pub fn options(&self) -> Result<RequestOptions, CallError> {
        let method = Method::from_bytes(self.method.trim().to_uppercase().as_bytes())
            .map_err(|e| CallError::BadRequest(format!("method {}: {e}", self.method)))?;
        let mut options = RequestOptions::new(method);
        if let Some(ref data) = self.data {
            options = options.body(data.clone());
        }
        for header in &self.headers {
            let (name, value) = header.split_once(':').ok_or_else(|| {
                CallError::BadRequest(format!("header must be `Name: value`: {header}"))
            })?;
            options = options.header(name, value)?;
        }
        Ok(options)
    }
}

pub async fn run(config: &SessionConfig, args: CallArgs) -> anyhow::Result<i32> {
    let options = match args.options() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(e.code().exit_code());
        }
    };

    let lifecycle = open_lifecycle(config)?;
    // Any refresh failure invalidates the session.
    if let Err(e) = lifecycle.refresh_now().await {
        eprintln!("error: {e}");
        if matches!(e, RefreshError::Aborted(_)) {
            return Ok(1);
        }
        eprintln!("run `portal login` to sign in again");
        return Ok(EXIT_RELOGIN);
    }

    let client = AuthorizedClient::from_config(config, lifecycle)?;
    let resp = match client.call(&args.url, options).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            if e.code().requires_login() {
                eprintln!("run `portal login` to sign in again");
            }
            return Ok(e.code().exit_code());
        }
    };

    let status = resp.status();
    let body = resp.bytes().await?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&body)?;
    if !body.ends_with(b"\n") && !body.is_empty() {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    if status.is_success() {
        Ok(0)
    } else {
        eprintln!("error: server returned {status}");
        Ok(1)
    }
}
