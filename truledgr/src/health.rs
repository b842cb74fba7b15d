//! API health probing.
//!
//! [`HealthMonitor`] reports whether the TruLedgr API is reachable. It supports three modes:
//!
//! - **On demand**: [`HealthMonitor::check_now`] probes the configured API immediately.
//! - **While editing**: [`HealthMonitor::check_candidate`] probes a URL the user is still typing,
//!   once input has been quiet for the debounce period. Only the latest value is ever probed.
//! - **Periodic**: [`HealthMonitor::start_periodic`] re-probes on an interval until the returned
//!   guard is dropped.
//!
//! Probes never fail: every transport or server problem maps to [`HealthStatus::Unhealthy`].

use async_trait::async_trait;
use reqwest::header::HOST;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::{HealthConfig, normalize_api_url};
use crate::debounce::Debouncer;
use crate::errors::Error;
use crate::http::{Endpoint, EndpointList};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// A probe is in flight
    Checking,
    /// Nothing has been probed yet, or the URL could not be parsed
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn label(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Checking => "checking",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: Option<String>,
}

/// Map a `/health` response to a status.
///
/// A 200 whose body cannot be read as `{"status": ...}` still counts as healthy: the server
/// answered, which is what reachability cares about.
pub fn status_from_response(status: StatusCode, body: &str) -> HealthStatus {
    if status != StatusCode::OK {
        return HealthStatus::Unhealthy;
    }

    match serde_json::from_str::<HealthBody>(body) {
        Ok(HealthBody { status: Some(reported) }) => match reported.trim() {
            s if s.eq_ignore_ascii_case("healthy") => HealthStatus::Healthy,
            s if s.eq_ignore_ascii_case("degraded") => HealthStatus::Degraded,
            _ => HealthStatus::Unhealthy,
        },
        Ok(HealthBody { status: None }) => HealthStatus::Healthy,
        Err(e) => {
            tracing::debug!("Unparseable health body treated as healthy: {}", e);
            HealthStatus::Healthy
        }
    }
}

/// Something that can tell how healthy the API at a base URL is.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, base: &Url) -> HealthStatus;
}

/// Probes `GET {base}/health` over HTTP.
///
/// With [`with_endpoints`](Self::with_endpoints), probes of that list's primary URL walk its
/// fallbacks the same way API requests do. Any other URL is probed directly.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    endpoints: Option<EndpointList>,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("truledgr/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Other(anyhow::anyhow!("Failed to create health check client: {e}")))?;
        Ok(Self { client, endpoints: None })
    }

    pub fn with_endpoints(mut self, endpoints: EndpointList) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    fn request(&self, endpoint: &Endpoint) -> Result<reqwest::RequestBuilder, Error> {
        let mut request = self.client.get(endpoint.join("health")?);
        if let Some(host) = &endpoint.host {
            request = request.header(HOST, host);
        }
        Ok(request)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, base: &Url) -> HealthStatus {
        let direct;
        let endpoints = match &self.endpoints {
            Some(list) if &list.primary().url == base => list,
            _ => {
                direct = EndpointList::new(base.clone());
                &direct
            }
        };

        let result = endpoints
            .try_each(|endpoint| {
                let request = self.request(endpoint);
                async move {
                    let response = request?.send().await?;
                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            tracing::debug!("Failed to read health body: {}", e);
                            String::new()
                        }
                    };
                    Ok::<_, Error>((status, body))
                }
            })
            .await;

        match result {
            Ok((status, body)) => {
                let health = status_from_response(status, &body);
                tracing::debug!(%base, http_status = status.as_u16(), %health, "Health check complete");
                health
            }
            Err(Error::Network { kind, message }) => {
                tracing::info!(%base, %kind, "Health check failed: {}", message);
                HealthStatus::Unhealthy
            }
            Err(e) => {
                tracing::debug!("Cannot probe health of {}: {}", base, e);
                HealthStatus::Unknown
            }
        }
    }
}

/// Publishes the API's health through watch channels.
///
/// The configured API and the candidate URL being edited have separate channels, so editing a
/// server URL never disturbs the status of the one in use.
pub struct HealthMonitor {
    probe: Arc<dyn HealthProbe>,
    base_url: Url,
    interval: Duration,
    status: Arc<watch::Sender<HealthStatus>>,
    candidate: Arc<watch::Sender<HealthStatus>>,
    debouncer: Debouncer,
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("base_url", &self.base_url.as_str())
            .field("interval", &self.interval)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl HealthMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, base_url: Url, config: &HealthConfig) -> Self {
        Self {
            probe,
            base_url,
            interval: config.interval,
            status: Arc::new(watch::channel(HealthStatus::Unknown).0),
            candidate: Arc::new(watch::channel(HealthStatus::Unknown).0),
            debouncer: Debouncer::new(config.debounce),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn status(&self) -> HealthStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status.subscribe()
    }

    pub fn candidate_status(&self) -> HealthStatus {
        *self.candidate.borrow()
    }

    pub fn subscribe_candidate(&self) -> watch::Receiver<HealthStatus> {
        self.candidate.subscribe()
    }

    /// Probe the configured API now and publish the result.
    pub async fn check_now(&self) -> HealthStatus {
        self.status.send_replace(HealthStatus::Checking);
        let health = self.probe.probe(&self.base_url).await;
        self.status.send_replace(health);
        health
    }

    /// Probe `input` once it has stopped changing.
    ///
    /// Each call replaces the previous pending check, so a burst of edits produces a single
    /// probe of the last value. Input that is not a usable URL publishes `Unknown`.
    pub fn check_candidate(&self, input: impl Into<String>) {
        let input = input.into();
        let probe = self.probe.clone();
        let candidate = self.candidate.clone();

        self.debouncer.schedule(move |token| async move {
            let url = match normalize_api_url(&input) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Candidate URL rejected: {}", e);
                    if !token.is_cancelled() {
                        candidate.send_replace(HealthStatus::Unknown);
                    }
                    return;
                }
            };

            if token.is_cancelled() {
                return;
            }
            candidate.send_replace(HealthStatus::Checking);
            let health = probe.probe(&url).await;

            if token.is_cancelled() {
                tracing::debug!(%url, "Discarding superseded health result");
                return;
            }
            candidate.send_replace(health);
        });
    }

    /// Stop any pending candidate check.
    pub fn cancel_candidate(&self) {
        self.debouncer.cancel();
    }

    /// Probe the configured API now and then every `interval` until the guard is dropped.
    pub fn start_periodic(&self) -> PeriodicHealthCheck {
        let probe = self.probe.clone();
        let status = self.status.clone();
        let base_url = self.base_url.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let health = probe.probe(&base_url).await;
                if status.send_replace(health) != health {
                    tracing::info!(%base_url, %health, "API health changed");
                }
            }
        });

        tracing::debug!(interval = %humantime::format_duration(period), "Started periodic health checks");
        PeriodicHealthCheck { handle }
    }
}

/// Running periodic health check. Dropping it stops the checks.
#[derive(Debug)]
#[must_use = "periodic health checks stop when the guard is dropped"]
pub struct PeriodicHealthCheck {
    handle: JoinHandle<()>,
}

impl PeriodicHealthCheck {
    pub fn stop(self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for PeriodicHealthCheck {
    fn drop(&mut self) {
        self.handle.abort();
        tracing::debug!("Stopped periodic health checks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::utils::RecordingProbe;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> HealthConfig {
        HealthConfig {
            timeout: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            interval: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (StatusCode::OK, r#"{"status": "healthy"}"#, HealthStatus::Healthy),
            (StatusCode::OK, r#"{"status": "Healthy"}"#, HealthStatus::Healthy),
            (StatusCode::OK, r#"{"status": "degraded"}"#, HealthStatus::Degraded),
            (StatusCode::OK, r#"{"status": "maintenance"}"#, HealthStatus::Unhealthy),
            (StatusCode::OK, r#"{"version": "1.2.0"}"#, HealthStatus::Healthy),
            (StatusCode::OK, "OK", HealthStatus::Healthy),
            (StatusCode::OK, "", HealthStatus::Healthy),
            (StatusCode::SERVICE_UNAVAILABLE, r#"{"status": "healthy"}"#, HealthStatus::Unhealthy),
            (StatusCode::NO_CONTENT, "", HealthStatus::Unhealthy),
        ];

        for (status, body, expected) in cases {
            assert_eq!(status_from_response(status, body), expected, "{status} {body}");
        }
    }

    #[tokio::test]
    async fn test_http_probe_against_server() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "degraded"})))
            .expect(1)
            .mount(&server)
            .await;

        let probe = HttpHealthProbe::new(Duration::from_secs(5)).unwrap();
        let base = Url::parse(&server.uri()).unwrap();

        assert_eq!(probe.probe(&base).await, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable_is_unhealthy() {
        let probe = HttpHealthProbe::new(Duration::from_secs(5)).unwrap();
        let base = Url::parse("http://127.0.0.1:1").unwrap();

        assert_eq!(probe.probe(&base).await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_http_probe_timeout_is_unhealthy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let probe = HttpHealthProbe::new(Duration::from_millis(100)).unwrap();
        let base = Url::parse(&server.uri()).unwrap();

        assert_eq!(probe.probe(&base).await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_configured_api_probe_uses_fallback_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .and(header("host", "api.truledgr.app"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
            .expect(1)
            .mount(&server)
            .await;

        // Port 1 refuses connections, standing in for an unreachable primary
        let primary = Url::parse("http://127.0.0.1:1").unwrap();
        let endpoints = EndpointList::with_fallbacks(
            primary.clone(),
            [Endpoint::with_host(Url::parse(&server.uri()).unwrap(), "api.truledgr.app")],
        );
        let probe = HttpHealthProbe::new(Duration::from_secs(5)).unwrap().with_endpoints(endpoints);
        let monitor = HealthMonitor::new(Arc::new(probe.clone()), primary, &config());

        assert_eq!(monitor.check_now().await, HealthStatus::Healthy);
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        // Other URLs never borrow the configured API's fallbacks
        let other = Url::parse("http://127.0.0.1:2").unwrap();
        assert_eq!(probe.probe(&other).await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_check_now_publishes() {
        let probe = Arc::new(RecordingProbe::returning(HealthStatus::Healthy));
        let monitor = HealthMonitor::new(probe.clone(), Url::parse("https://api.truledgr.app").unwrap(), &config());
        assert_eq!(monitor.status(), HealthStatus::Unknown);

        assert_eq!(monitor.check_now().await, HealthStatus::Healthy);
        assert_eq!(monitor.status(), HealthStatus::Healthy);
        assert_eq!(probe.calls(), vec!["https://api.truledgr.app/".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_candidate_burst_probes_last_value_once() {
        let probe = Arc::new(RecordingProbe::returning(HealthStatus::Healthy));
        let monitor = HealthMonitor::new(probe.clone(), Url::parse("https://api.truledgr.app").unwrap(), &config());

        for input in ["l", "lo", "loc", "localhost", "localhost:8000"] {
            monitor.check_candidate(input);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(probe.calls(), vec!["https://localhost:8000/".to_string()]);
        assert_eq!(monitor.candidate_status(), HealthStatus::Healthy);
        // The configured API's status is untouched
        assert_eq!(monitor.status(), HealthStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_candidate_never_publishes() {
        let probe = Arc::new(RecordingProbe::returning(HealthStatus::Degraded).with_delay(Duration::from_secs(2)));
        let monitor = HealthMonitor::new(probe.clone(), Url::parse("https://api.truledgr.app").unwrap(), &config());

        monitor.check_candidate("slow.example.com");
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert_eq!(monitor.candidate_status(), HealthStatus::Checking);

        monitor.check_candidate("not a url at all");
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(probe.calls().len(), 1);
        assert_eq!(monitor.candidate_status(), HealthStatus::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_checks_stop_on_drop() {
        let probe = Arc::new(RecordingProbe::returning(HealthStatus::Healthy));
        let monitor = HealthMonitor::new(probe.clone(), Url::parse("https://api.truledgr.app").unwrap(), &config());

        let periodic = monitor.start_periodic();
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(periodic.is_running());
        // Immediately, then at 30s and 60s
        assert_eq!(probe.calls().len(), 3);
        assert_eq!(monitor.status(), HealthStatus::Healthy);

        drop(periodic);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(probe.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_stop() {
        let probe = Arc::new(RecordingProbe::returning(HealthStatus::Unhealthy));
        let monitor = HealthMonitor::new(probe.clone(), Url::parse("https://api.truledgr.app").unwrap(), &config());

        let periodic = monitor.start_periodic();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(periodic.is_running());
        periodic.stop();
        tokio::time::sleep(Duration::from_secs(90)).await;

        assert_eq!(probe.calls().len(), 1);
        assert_eq!(monitor.status(), HealthStatus::Unhealthy);
    }
}
