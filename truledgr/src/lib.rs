//! # truledgr: TruLedgr API client
//!
//! Client-side session and connectivity layer for the TruLedgr personal finance API. It covers
//! what every TruLedgr front end needs before it can show any data:
//!
//! - **Session** ([`auth::SessionStore`]): who is signed in, with login, logout, user refresh and
//!   restore-on-start. State is published through a `tokio::sync::watch` channel.
//! - **Login flow** ([`auth::IdentifierFlow`]): identifier-first sign in. The email is checked
//!   against the server, then a password or a biometric unlock completes the login.
//! - **HTTP** ([`http::ApiClient`]): attaches the bearer token, tears the session down on any
//!   401 and falls back to secondary endpoints when the primary host is unreachable.
//! - **Health** ([`health::HealthMonitor`]): on-demand, debounced and periodic probes of the
//!   API's `/health` endpoint.
//! - **Resources** ([`resources::Resources`]): typed CRUD for users, groups, roles and
//!   permissions.
//!
//! [`AppContext`] wires these together from a [`Config`] and the persisted client state.
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> Result<(), truledgr::errors::Error> {
//! use truledgr::{AppContext, Config};
//! use truledgr::auth::Credentials;
//!
//! let ctx = AppContext::from_config(Config::default(), None)?;
//! ctx.session().initialize().await;
//! if !ctx.session().is_authenticated() {
//!     ctx.session().login(&Credentials::new("ada@example.com", "secret")).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod debounce;
pub mod errors;
pub mod health;
pub mod http;
pub mod models;
pub mod resources;
pub mod state;
pub mod telemetry;

#[cfg(test)]
mod test;

use std::sync::Arc;
use url::Url;

use crate::auth::{FileTokenStore, IdentifierFlow, SessionStore, TokenStore};
use crate::config::normalize_api_url;
use crate::errors::Result;
use crate::health::{HealthMonitor, HttpHealthProbe};
use crate::http::{ApiClient, Endpoint, EndpointList};
use crate::resources::Resources;
use crate::state::StateFile;

pub use config::Config;
pub use errors::Error;

/// Everything a front end needs, built from configuration and the persisted client state.
///
/// The API URL is resolved once at construction. [`set_api_url`](Self::set_api_url) persists a
/// new one for the next context that is built.
#[derive(Debug)]
pub struct AppContext {
    config: Config,
    state_file: Arc<StateFile>,
    client: ApiClient,
    session: SessionStore,
    health: HealthMonitor,
}

impl AppContext {
    /// Build the context. `api_url_override` wins over the saved and configured URLs.
    ///
    /// Fallback endpoints belong to the configured API, so they are only used when that is the
    /// URL in effect. An unreadable state file is moved aside and the context starts signed out.
    pub fn from_config(config: Config, api_url_override: Option<&str>) -> Result<Self> {
        let state_file = Arc::new(StateFile::new(config.state_file_path()));
        let saved = state_file.load_or_reset();
        let base_url = config.effective_api_url(api_url_override, saved.api_url.as_deref())?;

        let endpoints = if normalize_api_url(&config.api_url).is_ok_and(|configured| configured == base_url) {
            EndpointList::with_fallbacks(base_url.clone(), config.fallback_endpoints.iter().cloned().map(Endpoint::from))
        } else {
            EndpointList::new(base_url.clone())
        };
        tracing::debug!(api_url = %base_url, endpoints = endpoints.len(), "Resolved API endpoints");

        let probe = Arc::new(HttpHealthProbe::new(config.health.timeout)?.with_endpoints(endpoints.clone()));

        let tokens: Arc<dyn TokenStore> = Arc::new(FileTokenStore::new(state_file.clone()));
        let client = ApiClient::new(endpoints, tokens, config.request_timeout)?;
        let session = SessionStore::new(client.clone());

        let health = HealthMonitor::new(probe, base_url, &config.health);

        Ok(Self {
            config,
            state_file,
            client,
            session,
            health,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }

    pub fn resources(&self) -> Resources<'_> {
        Resources::new(&self.client)
    }

    pub fn identifier_flow(&self) -> IdentifierFlow {
        IdentifierFlow::new(self.session.clone(), self.config.auth.unknown_identifier)
    }

    /// Persist a custom API URL.
    ///
    /// A token issued by one server means nothing to another, so switching servers also forgets
    /// the saved token.
    pub fn set_api_url(&self, input: &str) -> Result<Url> {
        let url = normalize_api_url(input)?;
        let previous = self.state_file.load()?.api_url;

        self.state_file.update(|state| {
            if state.api_url.as_deref() != Some(url.as_str()) {
                state.access_token = None;
            }
            state.api_url = Some(url.to_string());
        })?;
        self.client.tokens().invalidate();

        tracing::info!(from = previous.as_deref().unwrap_or(self.config.api_url.as_str()), to = %url, "Saved API URL");
        Ok(url)
    }
}
