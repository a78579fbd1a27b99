// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authorized HTTP calls with one refresh-and-retry on `401`.

use std::sync::Arc;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::CallError;
use crate::lifecycle::SessionLifecycle;

/// Method, headers and body of one authorized call.
///
/// The body is held as [`Bytes`] so it can be replayed on the retry.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::new(Method::GET)
    }
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self { method, headers: HeaderMap::new(), body: None }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    /// `method` with `value` serialized as the JSON body.
    pub fn json<T: Serialize + ?Sized>(method: Method, value: &T) -> Result<Self, CallError> {
        let body = serde_json::to_vec(value).map_err(|e| CallError::BadRequest(e.to_string()))?;
        Ok(Self::new(method).body(body))
    }

    pub fn post_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, CallError> {
        Self::json(Method::POST, value)
    }

    pub fn put_json<T: Serialize + ?Sized>(value: &T) -> Result<Self, CallError> {
        Self::json(Method::PUT, value)
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Add a caller header. Caller headers override the defaults but never
    /// `Authorization`.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, CallError> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())
            .map_err(|e| CallError::BadRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value.trim())
            .map_err(|e| CallError::BadRequest(format!("header {name}: {e}")))?;
        self.headers.append(name, value);
        Ok(self)
    }
}

/// HTTP client that attaches the session's bearer token.
#[derive(Clone)]
pub struct AuthorizedClient {
    http: Client,
    lifecycle: Arc<SessionLifecycle>,
    base_url: String,
}

impl AuthorizedClient {
    pub fn new(
        http: Client,
        lifecycle: Arc<SessionLifecycle>,
        base_url: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { http, lifecycle, base_url }
    }

    pub fn from_config(
        config: &SessionConfig,
        lifecycle: Arc<SessionLifecycle>,
    ) -> anyhow::Result<Self> {
        let http = crate::http_client(config.request_timeout())?;
        Ok(Self::new(http, lifecycle, config.base_url()))
    }

    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    /// Resolve `/path` against the API base URL; absolute URLs pass through.
    pub fn resolve(&self, url: &str) -> String {
        if url.starts_with('/') {
            format!("{}{url}", self.base_url)
        } else {
            url.to_owned()
        }
    }

    /// Send an authorized request.
    ///
    /// A `401` forces a refresh of the rejected token and the request is
    /// retried once with the new one. Every other status is returned as is.
    pub async fn call(&self, url: &str, options: RequestOptions) -> Result<Response, CallError> {
        let Some(token) = self.lifecycle.store().bearer() else {
            return Err(CallError::Unauthenticated);
        };
        let url = self.resolve(url);

        let resp = self.send(&url, &options, &token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        debug!(url = %url, "request unauthorized, refreshing access token");
        let session = self
            .lifecycle
            .refresh_rejected(&token)
            .await
            .map_err(|e| CallError::AuthenticationFailed(e.to_string()))?;

        let retry = self.send(&url, &options, &session.access_token).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, user_id = %session.user_id, "still unauthorized after refresh");
            return Err(CallError::AuthenticationFailed(
                "request unauthorized after token refresh".to_owned(),
            ));
        }
        Ok(retry)
    }

    async fn send(
        &self,
        url: &str,
        options: &RequestOptions,
        token: &str,
    ) -> Result<Response, CallError> {
        let headers = build_headers(&options.headers, token)?;
        let mut req = self.http.request(options.method.clone(), url).headers(headers);
        if let Some(ref body) = options.body {
            req = req.body(body.clone());
        }
        req.send().await.map_err(|e| {
            if e.is_builder() {
                CallError::BadRequest(e.to_string())
            } else {
                CallError::Network(e.to_string())
            }
        })
    }
}

/// Defaults, then caller headers, then the bearer token.
fn build_headers(caller: &HeaderMap, token: &str) -> Result<HeaderMap, CallError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.extend(caller.clone());

    let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| CallError::BadRequest(format!("access token: {e}")))?;
    auth.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth);
    Ok(headers)
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
