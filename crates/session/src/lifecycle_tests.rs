// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::*;
use crate::session::REFRESH_ERROR_MARKER;
use crate::test_support::{test_session, test_timings, MockBackend};

fn lifecycle(
    backend: &MockBackend,
    session: Option<Session>,
    timings: Timings,
    persist_path: Option<PathBuf>,
) -> anyhow::Result<Arc<SessionLifecycle>> {
    let store = Arc::new(match session {
        Some(s) => TokenStore::with_session(s),
        None => TokenStore::new(),
    });
    let refresher = Refresher::new(backend.refresh_url(), timings)?;
    Ok(SessionLifecycle::new(store, refresher, timings, persist_path))
}

/// Session backed by tokens the mock accepts, expiring in `expires_in`.
fn live_session(backend: &MockBackend, expires_in: Duration) -> Session {
    let (access, refresh) = backend.issue_tokens();
    test_session(&access, &refresh, expires_in)
}

async fn wait_for(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

#[tokio::test]
async fn refresh_now_skips_network_when_fresh() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(300));
    let lc = lifecycle(&backend, Some(session.clone()), test_timings(), None)?;

    assert_eq!(lc.state(), SessionState::ValidFresh);
    let current = lc.refresh_now().await?;
    assert_eq!(current.access_token, session.access_token);
    assert_eq!(current.refresh_token, session.refresh_token);
    assert_eq!(backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn refresh_now_replaces_stale_token() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(10));
    let lc = lifecycle(&backend, Some(session.clone()), test_timings(), None)?;
    assert_eq!(lc.state(), SessionState::ValidStale);

    let refreshed = lc.refresh_now().await?;
    assert_ne!(refreshed.access_token, session.access_token);
    assert_eq!(refreshed.refresh_token, session.refresh_token);
    assert!(refreshed.access_token_expires_at > session.access_token_expires_at);
    assert_eq!(lc.store().bearer(), Some(refreshed.access_token.clone()));
    assert_eq!(lc.state(), SessionState::ValidFresh);
    assert_eq!(backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn concurrent_refreshes_share_one_exchange() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_delay(Duration::from_millis(150));
    let session = live_session(&backend, Duration::from_secs(5));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let results = join_all((0..8).map(|_| lc.refresh_now())).await;

    assert_eq!(backend.refresh_calls(), 1);
    let tokens: Vec<String> = results
        .into_iter()
        .map(|r| r.map(|s| s.access_token.clone()))
        .collect::<Result<_, _>>()?;
    assert!(tokens.windows(2).all(|w| w[0] == w[1]), "tokens differ: {tokens:?}");
    Ok(())
}

#[tokio::test]
async fn mixed_triggers_coalesce() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_delay(Duration::from_millis(150));
    let session = live_session(&backend, Duration::from_secs(5));
    let rejected = session.access_token.clone();
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let (a, b) = tokio::join!(lc.refresh_now(), lc.refresh_rejected(&rejected));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(a?.access_token, b?.access_token);
    assert_eq!(backend.seen_refresh_tokens().len(), 1);
    Ok(())
}

#[tokio::test]
async fn state_reports_refreshing_while_in_flight() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_delay(Duration::from_millis(200));
    let session = live_session(&backend, Duration::from_secs(5));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let task = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.refresh_now().await }
    });
    assert!(wait_for(|| lc.state() == SessionState::Refreshing).await);
    task.await??;
    assert_eq!(lc.state(), SessionState::ValidFresh);
    Ok(())
}

#[tokio::test]
async fn failed_refresh_invalidates_without_retry() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.script_refresh(vec![(401, r#"{"detail":"token_not_valid"}"#.to_owned())]);
    let session = live_session(&backend, Duration::from_secs(5));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;
    let mut events = lc.subscribe();

    let result = lc.refresh_now().await;
    assert!(matches!(result, Err(RefreshError::Rejected { status: 401, .. })), "got {result:?}");

    let held = lc.store().get();
    assert_eq!(held.and_then(|s| s.error.clone()).as_deref(), Some(REFRESH_ERROR_MARKER));
    assert!(!lc.store().is_fresh(Duration::ZERO));
    assert!(lc.store().bearer().is_none());
    assert_eq!(lc.state(), SessionState::Invalid);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::RefreshFailed { .. })));

    assert_eq!(lc.refresh_now().await.err(), Some(RefreshError::Invalidated));
    assert_eq!(backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn refresh_rejected_forces_exchange_for_fresh_token() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(300));
    let lc = lifecycle(&backend, Some(session.clone()), test_timings(), None)?;

    let refreshed = lc.refresh_rejected(&session.access_token).await?;
    assert_ne!(refreshed.access_token, session.access_token);
    assert_eq!(backend.refresh_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn refresh_rejected_for_superseded_token_reuses_current() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(300));
    let lc = lifecycle(&backend, Some(session.clone()), test_timings(), None)?;

    let current = lc.refresh_rejected("access-superseded").await?;
    assert_eq!(current.access_token, session.access_token);
    assert_eq!(backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rotated_refresh_token_is_used_next_time() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.rotate_refresh_tokens(true);
    let session = live_session(&backend, Duration::from_secs(5));
    let first_refresh = session.refresh_token.clone();
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let once = lc.refresh_rejected(&lc.store().bearer().unwrap_or_default()).await?;
    assert_ne!(once.refresh_token, first_refresh);
    lc.refresh_rejected(&once.access_token).await?;

    assert_eq!(backend.seen_refresh_tokens(), vec![first_refresh, once.refresh_token.clone()]);
    Ok(())
}

#[tokio::test]
async fn no_session_reports_signed_out() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let lc = lifecycle(&backend, None, test_timings(), None)?;
    assert_eq!(lc.state(), SessionState::SignedOut);
    assert_eq!(lc.refresh_now().await.err(), Some(RefreshError::NoSession));
    assert_eq!(backend.refresh_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn logout_during_refresh_is_not_overwritten() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_delay(Duration::from_millis(200));
    let session = live_session(&backend, Duration::from_secs(5));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;
    let mut events = lc.subscribe();

    let task = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.refresh_now().await }
    });
    assert!(wait_for(|| backend.refresh_calls() == 1).await);
    assert!(lc.logout().await.is_some());

    let result = task.await?;
    assert!(matches!(result, Err(RefreshError::Aborted(_))), "got {result:?}");
    assert!(lc.store().get().is_none());
    assert_eq!(lc.state(), SessionState::SignedOut);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::LoggedOut)));
    assert!(lc.shutdown_token().is_cancelled());
    Ok(())
}

#[tokio::test]
async fn timer_refreshes_before_expiry() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let timings = Timings {
        refresh_interval: Duration::from_millis(100),
        refresh_skew: Duration::ZERO,
        ..test_timings()
    };
    // Fresh now, but stale before the second tick.
    let session = live_session(&backend, Duration::from_millis(150));
    let lc = lifecycle(&backend, Some(session.clone()), timings, None)?;
    assert_eq!(lc.state(), SessionState::ValidFresh);

    let controller = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.run().await }
    });

    assert!(wait_for(|| backend.refresh_calls() == 1).await);
    assert!(wait_for(|| lc.store().bearer() != Some(session.access_token.clone())).await);

    // The new token lasts the full TTL, so later ticks leave it alone.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(backend.refresh_calls(), 1);

    lc.shutdown();
    tokio::time::timeout(Duration::from_secs(2), controller).await??;
    Ok(())
}

#[tokio::test]
async fn focus_refreshes_stale_token() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(10));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let controller = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.run().await }
    });
    lc.notify_focus();

    assert!(wait_for(|| backend.refresh_calls() == 1).await);
    assert!(wait_for(|| lc.state() == SessionState::ValidFresh).await);

    lc.shutdown();
    tokio::time::timeout(Duration::from_secs(2), controller).await??;
    Ok(())
}

#[tokio::test]
async fn focus_on_fresh_session_is_noop() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let session = live_session(&backend, Duration::from_secs(300));
    let lc = lifecycle(&backend, Some(session), test_timings(), None)?;

    let controller = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.run().await }
    });
    lc.notify_focus();
    lc.notify_focus();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(backend.refresh_calls(), 0);

    lc.shutdown();
    tokio::time::timeout(Duration::from_secs(2), controller).await??;
    Ok(())
}

#[tokio::test]
async fn second_run_returns_immediately() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let lc = lifecycle(&backend, None, test_timings(), None)?;

    let controller = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.run().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    tokio::time::timeout(Duration::from_secs(1), lc.run()).await?;

    lc.shutdown();
    tokio::time::timeout(Duration::from_secs(2), controller).await??;
    Ok(())
}

#[tokio::test]
async fn refresh_and_logout_update_persisted_session() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session)?;
    let lc = lifecycle(&backend, Some(session), test_timings(), Some(path.clone()))?;

    let refreshed = lc.refresh_now().await?;
    let saved = persist::load(&path)?;
    assert_eq!(saved.map(|s| s.access_token), Some(refreshed.access_token.clone()));

    lc.logout().await;
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn refresh_adopts_session_saved_by_another_lifecycle() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.single_use_refresh_tokens();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session)?;
    let first = lifecycle(&backend, Some(session.clone()), test_timings(), Some(path.clone()))?;
    let second = lifecycle(&backend, Some(session.clone()), test_timings(), Some(path.clone()))?;

    let refreshed = first.refresh_now().await?;
    let adopted = second.refresh_now().await?;

    assert_eq!(adopted, refreshed);
    assert_eq!(second.store().get(), Some(refreshed));
    assert_eq!(backend.seen_refresh_tokens(), vec![session.refresh_token]);
    assert_eq!(second.state(), SessionState::ValidFresh);
    Ok(())
}

#[tokio::test]
async fn concurrent_lifecycles_on_one_file_share_one_exchange() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.single_use_refresh_tokens();
    backend.set_refresh_delay(Duration::from_millis(100));
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session)?;
    let first = lifecycle(&backend, Some(session.clone()), test_timings(), Some(path.clone()))?;
    let second = lifecycle(&backend, Some(session), test_timings(), Some(path.clone()))?;

    let (a, b) = tokio::join!(first.refresh_now(), second.refresh_now());
    assert_eq!(a?.access_token, b?.access_token);
    assert_eq!(backend.refresh_calls(), 1);
    assert!(persist::load(&path)?.is_some_and(|s| !s.is_invalid()));
    Ok(())
}

#[tokio::test]
async fn refresh_after_file_removed_logs_out() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session)?;
    let lc = lifecycle(&backend, Some(session), test_timings(), Some(path.clone()))?;
    let mut events = lc.subscribe();

    persist::remove(&path)?;
    let result = lc.refresh_now().await;

    assert!(matches!(result, Err(RefreshError::NoSession)), "got {result:?}");
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(lc.state(), SessionState::SignedOut);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::LoggedOut)));
    assert!(lc.shutdown_token().is_cancelled());
    assert!(!path.exists());
    Ok(())
}

#[tokio::test]
async fn refresh_adopts_invalidation_saved_by_another_lifecycle() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session.invalidated())?;
    let lc = lifecycle(&backend, Some(session), test_timings(), Some(path.clone()))?;
    let mut events = lc.subscribe();

    let result = lc.refresh_now().await;

    assert!(matches!(result, Err(RefreshError::Invalidated)), "got {result:?}");
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(lc.state(), SessionState::Invalid);
    assert!(matches!(events.try_recv(), Ok(SessionEvent::RefreshFailed { .. })));
    Ok(())
}

#[tokio::test]
async fn logout_waits_for_refresh_holding_the_file() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_delay(Duration::from_millis(200));
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("session.json");
    let session = live_session(&backend, Duration::from_secs(5));
    persist::save(&path, &session)?;
    let lc = lifecycle(&backend, Some(session), test_timings(), Some(path.clone()))?;

    let task = tokio::spawn({
        let lc = Arc::clone(&lc);
        async move { lc.refresh_now().await }
    });
    assert!(wait_for(|| backend.refresh_calls() == 1).await);
    assert!(lc.logout().await.is_some());

    let result = task.await?;
    assert!(matches!(result, Err(RefreshError::Aborted(_))), "got {result:?}");
    assert!(!path.exists());
    Ok(())
}
