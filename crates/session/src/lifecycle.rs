// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session refresh controller.
//!
//! Three triggers can ask for a refresh: the periodic timer, the client
//! regaining focus, and callers that need a usable token right now (for
//! example after a `401`). All of them funnel into [`SessionLifecycle::refresh`],
//! which keeps at most one refresh-token exchange in flight; concurrent
//! requests join it and observe the same outcome. Lifecycles persisting to
//! the same file also take its lock and start from the saved copy, so a
//! refresh token is never presented twice, even across processes.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::refresh::Refresher;
use crate::config::Timings;
use crate::error::RefreshError;
use crate::persist;
use crate::session::{Session, TokenStore};

/// Outcome shared by every caller joined on one refresh.
pub type RefreshResult = Result<Arc<Session>, RefreshError>;

type InFlight = Shared<BoxFuture<'static, RefreshResult>>;

/// Observable state of the held session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    SignedOut,
    ValidFresh,
    ValidStale,
    Refreshing,
    Invalid,
}

/// What asked for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Timer,
    Focus,
    OnDemand,
    Unauthorized,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Focus => "focus",
            Self::OnDemand => "on_demand",
            Self::Unauthorized => "unauthorized",
        }
    }
}

/// Events emitted by the lifecycle.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Refreshed { user_id: String, trigger: Trigger, expires_at: u64 },
    /// The session is now invalid; the user must log in again.
    RefreshFailed { user_id: String, trigger: Trigger, error: String },
    LoggedOut,
}

pub struct SessionLifecycle {
    store: Arc<TokenStore>,
    refresher: Refresher,
    timings: Timings,
    persist_path: Option<PathBuf>,
    in_flight: Mutex<Option<(u64, InFlight)>>,
    next_flight: AtomicU64,
    trigger_tx: mpsc::Sender<Trigger>,
    trigger_rx: Mutex<Option<mpsc::Receiver<Trigger>>>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
}

impl SessionLifecycle {
    /// Create a lifecycle over `store`.
    ///
    /// When `persist_path` is set, every committed refresh (success or
    /// invalidation) is saved there. Refreshes then run under the file's lock
    /// and adopt whatever another process saved in the meantime; a missing
    /// file means the session was logged out elsewhere.
    pub fn new(
        store: Arc<TokenStore>,
        refresher: Refresher,
        timings: Timings,
        persist_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        let (event_tx, _) = broadcast::channel(32);
        Arc::new(Self {
            store,
            refresher,
            timings,
            persist_path,
            in_flight: Mutex::new(None),
            next_flight: AtomicU64::new(0),
            trigger_tx,
            trigger_rx: Mutex::new(Some(trigger_rx)),
            event_tx,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn state(&self) -> SessionState {
        let Some(session) = self.store.get() else {
            return SessionState::SignedOut;
        };
        if session.is_invalid() {
            SessionState::Invalid
        } else if self.in_flight.lock().is_some() {
            SessionState::Refreshing
        } else if session.is_fresh(self.timings.refresh_skew) {
            SessionState::ValidFresh
        } else {
            SessionState::ValidStale
        }
    }

    /// Refresh unless the session is still fresh.
    ///
    /// Joins a refresh already in flight instead of starting another.
    pub async fn refresh_now(self: &Arc<Self>) -> RefreshResult {
        let skew = self.timings.refresh_skew;
        self.refresh(Trigger::OnDemand, move |s| !s.is_fresh(skew)).await
    }

    /// Refresh after the backend rejected `rejected_token`.
    ///
    /// Refreshes even if the token looks fresh locally. If the rejected token
    /// has already been replaced, returns the current session without a
    /// network call.
    pub async fn refresh_rejected(self: &Arc<Self>, rejected_token: &str) -> RefreshResult {
        let rejected = rejected_token.to_owned();
        self.refresh(Trigger::Unauthorized, move |s| s.access_token == rejected).await
    }

    /// Signal that the client regained focus.
    pub fn notify_focus(&self) {
        match self.trigger_tx.try_send(Trigger::Focus) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("focus trigger coalesced with pending triggers");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("refresh controller gone, focus trigger dropped");
            }
        }
    }

    /// Coalesced refresh entry point.
    ///
    /// `needs_refresh` decides, against the current session, whether a new
    /// exchange is required; it is not consulted when joining one in flight.
    pub async fn refresh<F>(self: &Arc<Self>, trigger: Trigger, needs_refresh: F) -> RefreshResult
    where
        F: FnOnce(&Session) -> bool,
    {
        let flight = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some((_, flight)) => {
                    debug!(trigger = trigger.as_str(), "joining in-flight refresh");
                    flight.clone()
                }
                None => {
                    let Some(session) = self.store.get() else {
                        return Err(RefreshError::NoSession);
                    };
                    if session.is_invalid() {
                        return Err(RefreshError::Invalidated);
                    }
                    if !needs_refresh(&session) {
                        return Ok(session);
                    }

                    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
                    let this = Arc::clone(self);
                    // Detached so that a caller giving up never aborts an
                    // exchange whose refresh token may already be spent.
                    let handle =
                        tokio::spawn(async move { this.run_refresh(id, session, trigger).await });
                    let flight = async move {
                        handle.await.unwrap_or_else(|e| Err(RefreshError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some((id, flight.clone()));
                    flight
                }
            }
        };
        flight.await
    }

    async fn run_refresh(
        self: Arc<Self>,
        id: u64,
        session: Arc<Session>,
        trigger: Trigger,
    ) -> RefreshResult {
        let outcome = match self.persist_path {
            Some(ref path) => self.refresh_persisted(path, session, trigger).await,
            None => self.exchange(session, trigger, None).await,
        };

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|(flight_id, _)| *flight_id == id) {
            *slot = None;
        }
        outcome
    }

    /// Refresh while holding the session file lock.
    ///
    /// The saved copy wins over the held one: another process may have
    /// refreshed, invalidated or removed it since it was loaded here.
    async fn refresh_persisted(
        &self,
        path: &Path,
        session: Arc<Session>,
        trigger: Trigger,
    ) -> RefreshResult {
        let _lock = persist::lock_async(path.to_path_buf())
            .await
            .map_err(|e| RefreshError::Aborted(format!("session lock: {e:#}")))?;

        let basis = match persist::load(path) {
            Ok(None) => {
                self.logged_out_elsewhere(&session);
                return Err(RefreshError::NoSession);
            }
            Ok(Some(saved)) if saved != *session => {
                if !self.store.replace_if(&session, saved.clone()) {
                    return Err(RefreshError::Aborted("session replaced during refresh".to_owned()));
                }
                let saved = Arc::new(saved);
                debug!(user_id = %saved.user_id, "adopted session saved by another process");
                if saved.is_invalid() {
                    let _ = self.event_tx.send(SessionEvent::RefreshFailed {
                        user_id: saved.user_id.clone(),
                        trigger,
                        error: RefreshError::Invalidated.to_string(),
                    });
                    return Err(RefreshError::Invalidated);
                }
                if saved.is_fresh(self.timings.refresh_skew) {
                    return Ok(saved);
                }
                saved
            }
            Ok(Some(_)) => session,
            Err(e) => {
                warn!(path = %path.display(), err = %e, "unreadable session file, using held copy");
                session
            }
        };
        self.exchange(basis, trigger, Some(path)).await
    }

    /// The session file is gone: drop the held copy and stop the controller.
    fn logged_out_elsewhere(&self, held: &Session) {
        if self.store.clear_if(held) {
            info!(user_id = %held.user_id, "session file removed, logged out");
            let _ = self.event_tx.send(SessionEvent::LoggedOut);
        }
        self.shutdown.cancel();
    }

    /// One refresh-token exchange, committed over `session`.
    async fn exchange(
        &self,
        session: Arc<Session>,
        trigger: Trigger,
        path: Option<&Path>,
    ) -> RefreshResult {
        debug!(user_id = %session.user_id, trigger = trigger.as_str(), "refreshing access token");

        match self.refresher.refresh(&session.refresh_token).await {
            Ok(tokens) => {
                let next = session.with_refreshed(
                    tokens.access_token,
                    tokens.refresh_token,
                    tokens.expires_at,
                );
                if self.commit(&session, next.clone(), path) {
                    info!(
                        user_id = %next.user_id,
                        trigger = trigger.as_str(),
                        expires_in_ms = next.expires_in_ms(),
                        "access token refreshed"
                    );
                    let _ = self.event_tx.send(SessionEvent::Refreshed {
                        user_id: next.user_id.clone(),
                        trigger,
                        expires_at: next.access_token_expires_at,
                    });
                    Ok(Arc::new(next))
                } else {
                    warn!(
                        user_id = %session.user_id,
                        "session replaced during refresh, result discarded"
                    );
                    Err(RefreshError::Aborted("session replaced during refresh".to_owned()))
                }
            }
            Err(e) => {
                warn!(
                    user_id = %session.user_id,
                    trigger = trigger.as_str(),
                    err = %e,
                    "refresh failed, session requires login"
                );
                if self.commit(&session, session.invalidated(), path) {
                    let _ = self.event_tx.send(SessionEvent::RefreshFailed {
                        user_id: session.user_id.clone(),
                        trigger,
                        error: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Swap in `next` if `current` is still held, then persist it.
    ///
    /// `path` is only passed while its lock is held.
    fn commit(&self, current: &Session, next: Session, path: Option<&Path>) -> bool {
        let Some(path) = path else {
            return self.store.replace_if(current, next);
        };
        let saved = next.clone();
        if !self.store.replace_if(current, next) {
            return false;
        }
        if let Err(e) = persist::save(path, &saved) {
            warn!(path = %path.display(), err = %e, "failed to persist session");
        }
        true
    }

    /// Run the timer and focus triggers until shutdown.
    ///
    /// The timer refreshes a token that would go stale before its next tick;
    /// focus refreshes a token that is already stale.
    pub async fn run(self: &Arc<Self>) {
        let Some(mut triggers) = self.trigger_rx.lock().take() else {
            warn!("refresh controller already running");
            return;
        };

        let interval = self.timings.refresh_interval;
        let skew = self.timings.refresh_skew;
        let mut timer = tokio::time::interval_at(Instant::now() + interval, interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        info!(interval_ms, "session refresh controller started");

        loop {
            let trigger = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = timer.tick() => Trigger::Timer,
                msg = triggers.recv() => match msg {
                    Some(t) => t,
                    None => break,
                },
            };

            let window: Duration = match trigger {
                Trigger::Timer => skew + interval,
                _ => skew,
            };
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.refresh(trigger, move |s| !s.is_fresh(window)) => match result {
                    Ok(_) => {}
                    Err(RefreshError::NoSession | RefreshError::Invalidated) => {
                        debug!(trigger = trigger.as_str(), "no usable session, trigger ignored");
                    }
                    Err(e) => {
                        debug!(trigger = trigger.as_str(), err = %e, "triggered refresh failed");
                    }
                },
            }
        }

        info!("session refresh controller stopped");
    }

    /// Stop the controller without touching the session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Destroy the session: stop the controller, clear the store, and remove
    /// the persisted copy.
    ///
    /// Waits for a refresh holding the file lock; its result is discarded.
    pub async fn logout(&self) -> Option<Arc<Session>> {
        self.shutdown.cancel();
        let previous = self.store.clear();
        if let Some(ref path) = self.persist_path {
            if let Err(e) = remove_persisted(path).await {
                warn!(path = %path.display(), err = %e, "failed to remove persisted session");
            }
        }
        if let Some(ref session) = previous {
            info!(user_id = %session.user_id, "logged out");
        }
        let _ = self.event_tx.send(SessionEvent::LoggedOut);
        previous
    }
}

async fn remove_persisted(path: &Path) -> anyhow::Result<bool> {
    let _lock = persist::lock_async(path.to_path_buf()).await?;
    persist::remove(path)
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
