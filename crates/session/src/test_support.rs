// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test infrastructure: an in-process mock of the portal backend.
//!
//! The mock issues tokens of the form `access-N` / `refresh-N`, accepts only
//! tokens it has issued (and not revoked) on `/api/*` resources, and records
//! every call so tests can assert on call counts and headers. In single-use
//! mode a refresh token presented twice is rejected, like a backend that
//! rotates and revokes on every refresh.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::{SessionConfig, Timings};
use crate::session::{expires_after, Role, Session};

pub const STUDENT_EMAIL: &str = "student@example.com";
pub const INSTRUCTOR_EMAIL: &str = "instructor@example.com";
pub const PASSWORD: &str = "correct-horse";

/// Build a session expiring `expires_in` from now.
pub fn test_session(access: &str, refresh: &str, expires_in: Duration) -> Session {
    Session {
        user_id: "u-1".to_owned(),
        email: STUDENT_EMAIL.to_owned(),
        username: "sam".to_owned(),
        role: Role::Student,
        access_token: access.to_owned(),
        refresh_token: refresh.to_owned(),
        access_token_expires_at: expires_after(expires_in),
        error: None,
    }
}

/// Session config pointing at `api_url` with reference timings.
pub fn test_config(api_url: &str) -> SessionConfig {
    SessionConfig {
        api_url: api_url.to_owned(),
        token_ttl_ms: 300_000,
        refresh_skew_ms: 30_000,
        refresh_interval_ms: 240_000,
        refresh_timeout_ms: 2_000,
        request_timeout_ms: 5_000,
        state_dir: None,
        log_format: "text".to_owned(),
        log_level: "debug".to_owned(),
    }
}

/// Reference timings with a short refresh timeout.
pub fn test_timings() -> Timings {
    Timings { refresh_timeout: Duration::from_secs(2), ..Timings::default() }
}

#[derive(Default)]
struct MockState {
    next_id: AtomicU32,
    login_calls: AtomicU32,
    refresh_calls: AtomicU32,
    api_calls: AtomicU32,
    reject_all: AtomicBool,
    rotate_refresh: AtomicBool,
    single_use_refresh: AtomicBool,
    spent_refresh_tokens: Mutex<HashSet<String>>,
    refresh_delay: Mutex<Duration>,
    refresh_script: Mutex<VecDeque<(u16, String)>>,
    valid_tokens: Mutex<HashSet<String>>,
    seen_authorization: Mutex<Vec<String>>,
    seen_refresh_tokens: Mutex<Vec<String>>,
}

impl MockState {
    fn mint(&self) -> (String, String) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let access = format!("access-{n}");
        self.valid_tokens.lock().insert(access.clone());
        (access, format!("refresh-{n}"))
    }
}

/// Running mock backend, shut down on drop.
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown: CancellationToken,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/api/login", post(login))
            .route("/api/token/refresh/", post(refresh))
            .route("/api/submissions", any(resource))
            .route("/api/status/{code}", any(status_resource))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let sd = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app).with_graceful_shutdown(sd.cancelled_owned()).await.ok();
        });

        Ok(Self { addr, state, shutdown })
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn refresh_url(&self) -> String {
        format!("{}/api/token/refresh/", self.url())
    }

    pub fn config(&self) -> SessionConfig {
        test_config(&self.url())
    }

    /// Mint a token pair the backend accepts, without a login call.
    pub fn issue_tokens(&self) -> (String, String) {
        self.state.mint()
    }

    pub fn revoke(&self, access_token: &str) {
        self.state.valid_tokens.lock().remove(access_token);
    }

    /// Answer every resource call with 401 regardless of token.
    pub fn reject_all(&self, reject: bool) {
        self.state.reject_all.store(reject, Ordering::Relaxed);
    }

    /// Include a rotated `refreshToken` in refresh responses.
    pub fn rotate_refresh_tokens(&self, rotate: bool) {
        self.state.rotate_refresh.store(rotate, Ordering::Relaxed);
    }

    /// Accept each refresh token once; successful refreshes always rotate.
    pub fn single_use_refresh_tokens(&self) {
        self.state.single_use_refresh.store(true, Ordering::Relaxed);
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.state.refresh_delay.lock() = delay;
    }

    /// Queue raw `(status, body)` answers for upcoming refresh calls.
    pub fn script_refresh(&self, responses: Vec<(u16, String)>) {
        self.state.refresh_script.lock().extend(responses);
    }

    pub fn login_calls(&self) -> u32 {
        self.state.login_calls.load(Ordering::Relaxed)
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> u32 {
        self.state.api_calls.load(Ordering::Relaxed)
    }

    /// `Authorization` header values seen on resource calls, in order.
    pub fn seen_authorization(&self) -> Vec<String> {
        self.state.seen_authorization.lock().clone()
    }

    /// Refresh tokens presented to the refresh endpoint, in order.
    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.state.seen_refresh_tokens.lock().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[derive(serde::Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(s): State<Arc<MockState>>, Json(body): Json<LoginBody>) -> Response {
    s.login_calls.fetch_add(1, Ordering::Relaxed);
    let role = match (body.email.as_str(), body.password.as_str()) {
        (STUDENT_EMAIL, PASSWORD) => "student",
        (INSTRUCTOR_EMAIL, PASSWORD) => "instructor",
        _ => {
            return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Invalid credentials"})))
                .into_response()
        }
    };
    let (access, refresh) = s.mint();
    Json(json!({
        "user": {"id": 7, "email": body.email, "username": role, "role": role},
        "accessToken": access,
        "refreshToken": refresh,
    }))
    .into_response()
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh(State(s): State<Arc<MockState>>, Json(body): Json<RefreshBody>) -> Response {
    s.refresh_calls.fetch_add(1, Ordering::Relaxed);
    s.seen_refresh_tokens.lock().push(body.refresh_token.clone());

    let single_use = s.single_use_refresh.load(Ordering::Relaxed);
    if single_use && !s.spent_refresh_tokens.lock().insert(body.refresh_token) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "refresh token already used"})))
            .into_response();
    }

    let delay = *s.refresh_delay.lock();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let scripted = s.refresh_script.lock().pop_front();
    if let Some((status, body)) = scripted {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, body).into_response();
    }

    let (access, refresh) = s.mint();
    if single_use || s.rotate_refresh.load(Ordering::Relaxed) {
        Json(json!({"accessToken": access, "refreshToken": refresh})).into_response()
    } else {
        Json(json!({"accessToken": access})).into_response()
    }
}

fn check_bearer(s: &MockState, headers: &HeaderMap) -> Option<String> {
    s.api_calls.fetch_add(1, Ordering::Relaxed);
    let header = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or_default();
    s.seen_authorization.lock().push(header.to_owned());
    if s.reject_all.load(Ordering::Relaxed) {
        return None;
    }
    let token = header.strip_prefix("Bearer ")?;
    s.valid_tokens.lock().contains(token).then(|| token.to_owned())
}

async fn resource(
    State(s): State<Arc<MockState>>,
    method: Method,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(token) = check_bearer(&s, &headers) else {
        return (StatusCode::UNAUTHORIZED, Json(json!({"message": "Unauthorized"})))
            .into_response();
    };
    let content_type =
        headers.get("content-type").and_then(|v| v.to_str().ok()).unwrap_or_default();
    Json(json!({
        "token": token,
        "method": method.as_str(),
        "content_type": content_type,
        "body": body,
    }))
    .into_response()
}

async fn status_resource(
    State(s): State<Arc<MockState>>,
    Path(code): Path<u16>,
    headers: HeaderMap,
) -> Response {
    if check_bearer(&s, &headers).is_none() {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR).into_response()
}

/// Convert any `Result<T, E: Display>` into `anyhow::Result<T>`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}
