// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role-based route protection.

use std::sync::Arc;

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Router;
use tracing::debug;

use crate::session::{Role, Session, TokenStore};

/// Outcome of a route check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectTo(String),
}

/// Paths involved in route protection.
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    pub login_path: String,
    pub landing_path: String,
    pub instructor_prefix: String,
    pub student_prefix: String,
    /// Prefixes the gate applies to; everything else is public.
    pub protected: Vec<String>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            login_path: "/login".to_owned(),
            landing_path: "/dashboard".to_owned(),
            instructor_prefix: "/instructor".to_owned(),
            student_prefix: "/student".to_owned(),
            protected: ["/dashboard", "/instructor", "/student"].map(str::to_owned).to_vec(),
        }
    }
}

impl AccessPolicy {
    pub fn is_protected(&self, path: &str) -> bool {
        self.protected.iter().any(|prefix| under(path, prefix))
    }

    /// Decide whether `session` may view `path`.
    ///
    /// A session carrying the refresh error marker counts as no session.
    pub fn authorize(&self, path: &str, session: Option<&Session>) -> Decision {
        let Some(session) = session.filter(|s| !s.is_invalid()) else {
            return Decision::RedirectTo(self.login_path.clone());
        };
        if under(path, &self.instructor_prefix) && session.role != Role::Instructor {
            return Decision::RedirectTo(self.landing_path.clone());
        }
        if under(path, &self.student_prefix) && session.role != Role::Student {
            return Decision::RedirectTo(self.landing_path.clone());
        }
        Decision::Allow
    }
}

/// [`AccessPolicy::authorize`] with the default policy.
pub fn authorize(path: &str, session: Option<&Session>) -> Decision {
    AccessPolicy::default().authorize(path, session)
}

/// `path` equals `prefix` or continues it with a new segment.
///
/// Stricter than a plain `starts_with`: `/studentx` is not under `/student`
/// and passes the gate unprotected.
fn under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Axum middleware that redirects requests the policy does not allow.
///
/// Reads the session from request extensions (see [`attach_session`]).
/// Unprotected paths pass through untouched.
pub async fn gate_layer(
    State(policy): State<Arc<AccessPolicy>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if !policy.is_protected(path) {
        return next.run(req).await;
    }

    let session = req.extensions().get::<Arc<Session>>().cloned();
    match policy.authorize(path, session.as_deref()) {
        Decision::Allow => next.run(req).await,
        Decision::RedirectTo(target) => {
            debug!(path, target = %target, "route denied");
            Redirect::temporary(&target).into_response()
        }
    }
}

/// Axum middleware that exposes the current session as an `Arc<Session>`
/// request extension.
pub async fn attach_session(
    State(store): State<Arc<TokenStore>>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    if let Some(session) = store.get() {
        req.extensions_mut().insert(session);
    }
    next.run(req).await
}

/// Wrap `router` with [`attach_session`] and [`gate_layer`].
pub fn protect<S>(
    router: Router<S>,
    policy: Arc<AccessPolicy>,
    store: Arc<TokenStore>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn_with_state(policy, gate_layer))
        .layer(middleware::from_fn_with_state(store, attach_session))
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
