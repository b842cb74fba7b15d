//! Authenticated HTTP access to the TruLedgr API.
//!
//! [`ApiClient`] is the only place requests are sent from. It attaches the session token,
//! walks the endpoint fallback list and turns a 401 on a token-bearing request into a session
//! teardown: the token store is cleared and an [`AuthEvent::Unauthorized`] is broadcast so the
//! session store can drop its user. The rejected request is never retried. A 401 for a token
//! that has since been replaced, e.g. by a new login, leaves the new session alone.

use reqwest::header::{AUTHORIZATION, HOST};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::instrument;
use url::Url;

use super::endpoints::{Endpoint, EndpointList};
use crate::auth::token_store::TokenStore;
use crate::errors::{Error, Result};

/// Session-level events emitted by the client.
#[derive(Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// The server rejected `token`, which has already been cleared.
    Unauthorized { path: String, token: String },
}

impl fmt::Debug for AuthEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthEvent::Unauthorized { path, .. } => f
                .debug_struct("Unauthorized")
                .field("path", path)
                .field("token", &"<redacted>")
                .finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A request relative to the API base URL.
///
/// Requests are rebuilt for every endpoint tried, so they are kept as plain data rather than
/// as a `reqwest::RequestBuilder`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: RequestBody,
    authorization: Option<String>,
    anonymous: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
            authorization: None,
            anonymous: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body).map_err(|e| Error::Other(anyhow::anyhow!("Failed to serialize request body: {e}")))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        self.body = RequestBody::Form(fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect());
        self
    }

    /// Send this exact Authorization header. The session token is then not attached.
    pub fn authorization(mut self, value: impl Into<String>) -> Self {
        self.authorization = Some(value.into());
        self
    }

    /// Never attach the session token, e.g. for login or health checks.
    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn method(&self) -> &Method {
        &self.method
    }
}

#[derive(Debug)]
struct Inner {
    http: Client,
    endpoints: EndpointList,
    tokens: Arc<dyn TokenStore>,
    events: broadcast::Sender<AuthEvent>,
}

/// Cheaply cloneable handle to the API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    pub fn new(endpoints: EndpointList, tokens: Arc<dyn TokenStore>, request_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("truledgr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to create HTTP client: {e}")))?;
        let (events, _) = broadcast::channel(16);

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                endpoints,
                tokens,
                events,
            }),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.endpoints.primary().url
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.inner.endpoints
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.inner.tokens
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Send a request and return the raw response.
    ///
    /// Any status other than 401 is returned as-is; use [`send_json`](Self::send_json) or
    /// [`send_empty`](Self::send_empty) to map error statuses.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn execute(&self, request: ApiRequest) -> Result<Response> {
        let bearer = if request.anonymous || request.authorization.is_some() {
            None
        } else {
            self.inner.tokens.get()
        };

        let response = self
            .inner
            .endpoints
            .try_each(|endpoint| {
                let prepared = self.prepare(endpoint, &request, bearer.as_deref());
                async move { prepared?.send().await.map_err(Error::from) }
            })
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            if let Some(token) = &bearer {
                self.handle_unauthorized(&request.path, token);
            }
            return Err(Error::Auth {
                message: error_detail(&body),
            });
        }

        Ok(response)
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        let response = check_status(self.execute(request).await?).await?;
        response.json::<T>().await.map_err(Error::from)
    }

    pub async fn send_empty(&self, request: ApiRequest) -> Result<()> {
        check_status(self.execute(request).await?).await?;
        Ok(())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.send_json(ApiRequest::get(path)).await
    }

    fn prepare(&self, endpoint: &Endpoint, request: &ApiRequest, bearer: Option<&str>) -> Result<RequestBuilder> {
        let url = endpoint.join(&request.path)?;
        let mut builder = self.inner.http.request(request.method.clone(), url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(host) = &endpoint.host {
            builder = builder.header(HOST, host);
        }
        if let Some(value) = &request.authorization {
            builder = builder.header(AUTHORIZATION, value);
        } else if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Form(fields) => builder.form(fields),
        };

        Ok(builder)
    }

    fn handle_unauthorized(&self, path: &str, token: &str) {
        match self.inner.tokens.clear_if(token) {
            Ok(true) => tracing::warn!(path, "Session token rejected, clearing session"),
            Ok(false) => {
                tracing::debug!(path, "Rejected token was already replaced, keeping session");
                return;
            }
            Err(e) => tracing::error!("Failed to clear rejected token: {}", e),
        }
        // No receivers just means nobody is tracking session state
        let _ = self.inner.events.send(AuthEvent::Unauthorized {
            path: path.to_string(),
            token: token.to_string(),
        });
    }
}

async fn check_status(response: Response) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(server_error(status, &body))
}

/// Build an [`Error::Server`] from a status and response body.
///
/// FastAPI reports errors as `{"detail": "..."}` or, for validation failures,
/// `{"detail": [{"msg": "..."}]}`. Anything else falls back to the raw body, then to the
/// status reason phrase.
pub fn server_error(status: StatusCode, body: &str) -> Error {
    let message = error_detail(body)
        .or_else(|| {
            let trimmed = body.trim();
            (!trimmed.is_empty()).then(|| trimmed.chars().take(200).collect())
        })
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("Unexpected response").to_string());

    Error::Server { status, message }
}

pub(crate) fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail").or_else(|| value.get("message"))? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(items) => items.first()?.get("msg")?.as_str().map(str::to_string),
        _ => None,
    }
}
