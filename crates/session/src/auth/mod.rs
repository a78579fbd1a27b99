// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Backend auth endpoints: credential login and refresh-token exchange.
//!
//! Response bodies are decoded into explicit schemas and validated on
//! receipt; anything that does not fit is reported as malformed.

pub mod login;
pub mod refresh;

use serde::{Deserialize, Deserializer, Serialize};

use crate::session::Role;

/// Body of `POST /api/login`.
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Successful `POST /api/login` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user: UserInfo,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserInfo {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub email: String,
    pub username: String,
    #[serde(deserialize_with = "role_from_str")]
    pub role: Role,
}

/// Body of `POST /api/token/refresh/`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Successful `POST /api/token/refresh/` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

impl LoginResponse {
    pub fn validate(self) -> Result<Self, String> {
        if self.access_token.trim().is_empty() {
            return Err("empty accessToken".to_owned());
        }
        if self.refresh_token.trim().is_empty() {
            return Err("empty refreshToken".to_owned());
        }
        if self.user.id.is_empty() {
            return Err("empty user id".to_owned());
        }
        Ok(self)
    }
}

impl RefreshResponse {
    /// Reject empty tokens; an empty `refreshToken` counts as absent.
    pub fn validate(mut self) -> Result<Self, String> {
        if self.access_token.trim().is_empty() {
            return Err("empty accessToken".to_owned());
        }
        if self.refresh_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            self.refresh_token = None;
        }
        Ok(self)
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(serde_json::Number),
    }
    Ok(match Id::deserialize(de)? {
        Id::Str(s) => s,
        Id::Num(n) => n.to_string(),
    })
}

fn role_from_str<'de, D: Deserializer<'de>>(de: D) -> Result<Role, D::Error> {
    let raw = String::deserialize(de)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
