//! Client-side session state.
//!
//! [`SessionStore`] is the single owner of "who is signed in". It is constructed explicitly
//! from an [`ApiClient`] and handed to whatever needs it; observers follow changes through a
//! `watch` channel.
//!
//! Invariants:
//! - `is_authenticated` holds iff both a token and a user are present.
//! - `logout` clears local state whether or not the revoke call succeeds, and before it returns.
//! - A 401 on any token-bearing request clears the session (via [`AuthEvent::Unauthorized`]),
//!   unless the session has moved on to a different token.

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::instrument;

use super::api::AuthApi;
use super::models::{AuthUser, Credentials, Session};
use super::token_store::TokenStore;
use crate::errors::{Error, Result};
use crate::http::{ApiClient, AuthEvent};

const SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub token: Option<String>,
    pub user: Option<AuthUser>,
    pub session: Option<Session>,
    pub loading: bool,
    /// User-facing message from the last failed operation
    pub error: Option<String>,
}

impl SessionState {
    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }

    fn clear_session(&mut self) {
        self.token = None;
        self.user = None;
        self.session = None;
        self.loading = false;
    }
}

#[derive(Debug)]
struct Shared {
    client: ApiClient,
    state: Arc<watch::Sender<SessionState>>,
    listener: Option<JoinHandle<()>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    shared: Arc<Shared>,
}

impl SessionStore {
    /// Create a store for `client`.
    ///
    /// When called inside a tokio runtime this also starts a listener that clears the session
    /// whenever the client reports a rejected token. The listener stops when the last clone of
    /// the store is dropped.
    pub fn new(client: ApiClient) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        let state = Arc::new(state);

        let listener = match tokio::runtime::Handle::try_current() {
            Ok(handle) => Some(handle.spawn(clear_on_unauthorized(
                client.subscribe(),
                client.tokens().clone(),
                state.clone(),
            ))),
            Err(_) => {
                tracing::debug!("No tokio runtime, session will not follow unauthorized events");
                None
            }
        };

        Self {
            shared: Arc::new(Shared { client, state, listener }),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.shared.client
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.shared.state.borrow().is_authenticated()
    }

    pub fn token(&self) -> Option<String> {
        self.shared.state.borrow().token.clone()
    }

    pub fn user(&self) -> Option<AuthUser> {
        self.shared.state.borrow().user.clone()
    }

    pub fn error(&self) -> Option<String> {
        self.shared.state.borrow().error.clone()
    }

    pub fn clear_error(&self) {
        self.shared.state.send_if_modified(|s| s.error.take().is_some());
    }

    /// Sign in with a username and password.
    ///
    /// Empty credentials are rejected locally. On failure `error` is set and any existing
    /// session is left as it was. Failed logins are not retried.
    #[instrument(skip_all, fields(username = %credentials.username))]
    pub async fn login(&self, credentials: &Credentials) -> Result<AuthUser> {
        if let Err(e) = credentials.validate() {
            self.set_error(&e);
            return Err(e);
        }

        self.shared.state.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        let _loading = scopeguard::guard((), |()| self.shared.state.send_modify(|s| s.loading = false));

        let response = match AuthApi::new(&self.shared.client).login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                tracing::info!("Login failed: {}", e);
                self.set_error(&e);
                return Err(e);
            }
        };

        let session = Session::from_login(&response, Utc::now());
        if !session.is_valid(Utc::now()) {
            let e = Error::Auth {
                message: Some("The server did not return a usable access token".to_string()),
            };
            self.set_error(&e);
            return Err(e);
        }

        if let Err(e) = self.shared.client.tokens().set(session.access_token.clone()) {
            self.set_error(&e);
            return Err(e);
        }

        let user = response.user;
        self.shared.state.send_modify(|s| {
            s.token = Some(session.access_token.clone());
            s.session = Some(session);
            s.user = Some(user.clone());
            s.error = None;
        });

        tracing::info!(user_id = %user.id, "Signed in");
        Ok(user)
    }

    /// Sign out.
    ///
    /// The server revoke is best effort: its failure is logged and never surfaced. Local state
    /// is cleared unconditionally, including when this future is dropped mid-request.
    #[instrument(skip(self))]
    pub async fn logout(&self, all_sessions: bool) {
        let _teardown = scopeguard::guard((), |()| self.clear_local());

        if self.shared.client.tokens().get().is_none() {
            tracing::debug!("No session token to revoke");
            return;
        }

        if let Err(e) = AuthApi::new(&self.shared.client).logout(all_sessions).await {
            tracing::warn!("Logout request failed, clearing local session anyway: {}", e);
        }
    }

    /// Refresh the current user from `GET /auth/me`.
    ///
    /// Returns `Ok(None)` without a request when there is no token. A 401 ends the whole
    /// session before the error is returned.
    #[instrument(skip(self))]
    pub async fn fetch_user(&self) -> Result<Option<AuthUser>> {
        if self.token().is_none() {
            return Ok(None);
        }

        match AuthApi::new(&self.shared.client).me().await {
            Ok(user) => {
                self.shared.state.send_modify(|s| {
                    s.user = Some(user.clone());
                    s.error = None;
                });
                Ok(Some(user))
            }
            Err(e) if e.is_unauthorized() => {
                self.logout(false).await;
                self.set_error(&e);
                Err(e)
            }
            Err(e) => {
                self.set_error(&e);
                Err(e)
            }
        }
    }

    /// Restore a persisted session at startup.
    ///
    /// Never fails: if the saved token cannot be turned into a user the app simply starts
    /// signed out.
    pub async fn initialize(&self) {
        let Some(token) = self.shared.client.tokens().get() else {
            tracing::debug!("No persisted session");
            return;
        };

        self.shared.state.send_modify(|s| s.token = Some(token));

        match self.fetch_user().await {
            Ok(Some(user)) => tracing::info!(user_id = %user.id, "Restored session"),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!("Could not restore session: {}", e);
                self.clear_error();
            }
        }
    }

    fn set_error(&self, error: &Error) {
        let message = error.user_message();
        self.shared.state.send_modify(|s| s.error = Some(message));
    }

    fn clear_local(&self) {
        if let Err(e) = self.shared.client.tokens().clear() {
            tracing::error!("Failed to clear persisted token: {}", e);
        }
        self.shared.state.send_modify(SessionState::clear_session);
        tracing::debug!("Local session cleared");
    }
}

async fn clear_on_unauthorized(
    mut events: broadcast::Receiver<AuthEvent>,
    tokens: Arc<dyn TokenStore>,
    state: Arc<watch::Sender<SessionState>>,
) {
    loop {
        match events.recv().await {
            Ok(AuthEvent::Unauthorized { path, token }) => {
                let cleared = state.send_if_modified(|s| {
                    if s.token.as_deref() != Some(token.as_str()) {
                        return false;
                    }
                    // Only a signed-in user is told their session ended
                    if s.is_authenticated() {
                        s.error = Some(SESSION_EXPIRED.to_string());
                    }
                    s.clear_session();
                    true
                });
                if cleared {
                    tracing::debug!(path, "Cleared session after unauthorized response");
                } else {
                    tracing::debug!(path, "Ignoring unauthorized response for a previous token");
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Missed events are reconciled against the token store
                let current = tokens.get();
                tracing::debug!(skipped, "Session listener lagged");
                state.send_if_modified(|s| {
                    if s.token.is_none() || s.token == current {
                        return false;
                    }
                    s.clear_session();
                    true
                });
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
