//! Ordered endpoint fallback.
//!
//! The primary endpoint is normally a hostname. Deployments where DNS is unreliable (emulators,
//! captive networks) can list literal-IP fallbacks that carry the original hostname in an
//! explicit `Host` header. Every transport failure moves on to the next endpoint; only an HTTP
//! response, whatever its status, ends the walk.

use std::future::Future;
use url::Url;

use crate::config::FallbackEndpoint;
use crate::errors::{Error, Result, TransportFailure};

#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub url: Url,
    /// Sent as the `Host` header when set
    pub host: Option<String>,
}

impl Endpoint {
    pub fn new(url: Url) -> Self {
        Self { url, host: None }
    }

    pub fn with_host(url: Url, host: impl Into<String>) -> Self {
        Self {
            url,
            host: Some(host.into()),
        }
    }

    /// Resolve `path` relative to this endpoint, keeping any path prefix of the base URL.
    pub fn join(&self, path: &str) -> Result<Url> {
        ensure_slash(&self.url)
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to construct URL for '{path}' on {}: {e}", self.url)))
    }
}

impl From<FallbackEndpoint> for Endpoint {
    fn from(value: FallbackEndpoint) -> Self {
        Self {
            url: value.url,
            host: value.host,
        }
    }
}

/// Makes sure a url has a trailing slash.
///
/// `Url::join` replaces the last path segment unless the base ends with '/', so joining
/// '/api' and 'health' gives '/health' while '/api/' and 'health' gives '/api/health'.
pub(crate) fn ensure_slash(url: &Url) -> Url {
    if url.path().ends_with('/') {
        url.clone()
    } else {
        let mut new_url = url.clone();
        let mut path = new_url.path().to_string();
        path.push('/');
        new_url.set_path(&path);
        new_url
    }
}

/// A non-empty list of endpoints, primary first.
#[derive(Debug, Clone)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
}

impl EndpointList {
    pub fn new(primary: Url) -> Self {
        Self {
            endpoints: vec![Endpoint::new(primary)],
        }
    }

    pub fn with_fallbacks(primary: Url, fallbacks: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut list = Self::new(primary);
        list.endpoints.extend(fallbacks);
        list
    }

    pub fn primary(&self) -> &Endpoint {
        &self.endpoints[0]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Run `attempt` against each endpoint in order until one produces something other than a
    /// network error.
    ///
    /// Non-network errors are returned immediately. When every endpoint fails at the transport
    /// level the last failure is returned.
    pub async fn try_each<T, F, Fut>(&self, mut attempt: F) -> Result<T>
    where
        F: FnMut(&Endpoint) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            match attempt(endpoint).await {
                Err(Error::Network { kind, message }) => {
                    match kind {
                        TransportFailure::Dns => {
                            tracing::info!(endpoint = %endpoint.url, "Host could not be resolved, trying next endpoint");
                        }
                        _ => {
                            tracing::warn!(
                                endpoint = %endpoint.url,
                                failure = %kind,
                                error = %message,
                                "Request failed, trying next endpoint"
                            );
                        }
                    }
                    last_error = Some(Error::Network { kind, message });
                }
                other => {
                    if index > 0 {
                        tracing::debug!(endpoint = %endpoint.url, "Fallback endpoint responded");
                    }
                    return other;
                }
            }
        }

        tracing::error!(attempted = self.endpoints.len(), "All endpoints failed");
        Err(last_error.unwrap_or_else(|| Error::Config {
            message: "no API endpoints configured".to_string(),
        }))
    }
}
