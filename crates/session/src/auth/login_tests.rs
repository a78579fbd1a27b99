// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;
use crate::session::{epoch_ms, Role};
use crate::test_support::{MockBackend, INSTRUCTOR_EMAIL, PASSWORD, STUDENT_EMAIL};

const TTL: Duration = Duration::from_secs(300);

#[tokio::test]
async fn login_builds_session_with_expiry() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let http = crate::http_client(TTL)?;

    let before = epoch_ms();
    let session = login(&http, &backend.config().login_url(), TTL, STUDENT_EMAIL, PASSWORD).await?;

    assert_eq!(session.user_id, "7");
    assert_eq!(session.email, STUDENT_EMAIL);
    assert_eq!(session.role, Role::Student);
    assert!(session.access_token.starts_with("access-"));
    assert!(session.refresh_token.starts_with("refresh-"));
    assert!(session.access_token_expires_at > before);
    assert!(session.access_token_expires_at >= before + 300_000);
    assert!(session.error.is_none());
    assert_eq!(backend.login_calls(), 1);
    Ok(())
}

#[tokio::test]
async fn login_instructor_role() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let http = crate::http_client(TTL)?;
    let session =
        login(&http, &backend.config().login_url(), TTL, INSTRUCTOR_EMAIL, PASSWORD).await?;
    assert_eq!(session.role, Role::Instructor);
    Ok(())
}

#[tokio::test]
async fn wrong_password_is_rejected() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let http = crate::http_client(TTL)?;
    let result = login(&http, &backend.config().login_url(), TTL, STUDENT_EMAIL, "nope").await;
    match result {
        Err(LoginError::Rejected { status, .. }) => assert_eq!(status, 401),
        other => anyhow::bail!("expected Rejected, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_network_error() -> anyhow::Result<()> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let http = crate::http_client(TTL)?;
    let url = format!("http://{addr}/api/login");
    let result = login(&http, &url, TTL, STUDENT_EMAIL, PASSWORD).await;
    assert!(matches!(result, Err(LoginError::Network(_))), "got {result:?}");
    Ok(())
}
