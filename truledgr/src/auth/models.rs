//! Request and response models for the `/auth` endpoints.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Error, Result};
use crate::models::{RoleId, UserId, deserialize_id, deserialize_optional_id};

/// The signed-in user as returned by `GET /auth/me`.
///
/// The login response embeds a reduced form with only id, username and email, so everything
/// else defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub role_id: Option<RoleId>,
}

/// Username/password pair submitted to `POST /auth/login`.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reject credentials that can never succeed, without a network round trip.
    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() || self.password.is_empty() {
            return Err(Error::validation("Username and password are required"));
        }
        Ok(())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    pub user: AuthUser,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub totp_enabled: bool,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct LogoutRequest {
    pub all_sessions: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckEmailRequest<'a> {
    pub email: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckEmailResponse {
    pub exists: bool,
}

/// Client-side record of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub session_id: Option<String>,
    pub totp_enabled: bool,
    /// Derived from `expires_in` at login time
    pub expires_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn from_login(response: &LoginResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .map(|secs| now + Duration::seconds(secs));

        Self {
            access_token: response.access_token.clone(),
            token_type: response.token_type.clone(),
            expires_in: response.expires_in,
            session_id: response.session_id.clone(),
            totp_enabled: response.totp_enabled,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// A session is only usable with a non-empty, unexpired access token.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && !self.is_expired(now)
    }
}
