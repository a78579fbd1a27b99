// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `portal keepalive`: run the refresh controller in the foreground.
//!
//! SIGCONT (the process resuming in the foreground) acts as the focus
//! trigger. Exits 0 on Ctrl-C and 3 once the session is invalidated.

use std::future::Future;
use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};
use nix::sys::signal::Signal;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::command::{open_lifecycle, EXIT_RELOGIN};
use crate::config::SessionConfig;
use crate::lifecycle::{SessionEvent, SessionLifecycle, SessionState};

pub async fn run(config: &SessionConfig) -> anyhow::Result<i32> {
    let lifecycle = open_lifecycle(config)?;
    match lifecycle.state() {
        SessionState::SignedOut => {
            eprintln!("error: not logged in, run `portal login`");
            return Ok(EXIT_RELOGIN);
        }
        SessionState::Invalid => {
            eprintln!("error: session expired, run `portal login`");
            return Ok(EXIT_RELOGIN);
        }
        _ => {}
    }

    let sigcont = signal(SignalKind::from_raw(Signal::SIGCONT as i32))?;
    let focus = stream::unfold(sigcont, |mut sig| async move {
        sig.recv().await.map(|()| ((), sig))
    });
    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    Ok(keep_alive(&lifecycle, interrupt, focus).await)
}

/// Drive `lifecycle` until `interrupt` resolves or the session ends.
///
/// Every item of `focus` is forwarded as a focus trigger. Returns the exit
/// code.
pub async fn keep_alive<I, F>(lifecycle: &Arc<SessionLifecycle>, interrupt: I, focus: F) -> i32
where
    I: Future<Output = ()>,
    F: Stream<Item = ()>,
{
    let mut events = lifecycle.subscribe();
    let controller = tokio::spawn({
        let lifecycle = Arc::clone(lifecycle);
        async move { lifecycle.run().await }
    });
    if let Some(session) = lifecycle.store().get() {
        info!(user_id = %session.user_id, "keeping session alive");
    }
    // A token that went stale while nothing was running gets refreshed now.
    lifecycle.notify_focus();

    tokio::pin!(interrupt);
    tokio::pin!(focus);
    let code = loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("interrupted");
                break 0;
            }
            Some(()) = focus.next() => {
                debug!("focus regained");
                lifecycle.notify_focus();
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Refreshed { expires_at, .. }) => {
                    debug!(expires_at, "session refreshed");
                }
                Ok(SessionEvent::RefreshFailed { error, .. }) => {
                    eprintln!("error: {error}");
                    eprintln!("session expired, run `portal login`");
                    break EXIT_RELOGIN;
                }
                Ok(SessionEvent::LoggedOut) => break 0,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "session events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break 1,
            },
        }
    };

    lifecycle.shutdown();
    let _ = controller.await;
    code
}
