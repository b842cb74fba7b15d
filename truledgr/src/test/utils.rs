//! Test utilities: fake collaborators and canned API payloads
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;
use wiremock::MockServer;

use crate::auth::flow::{BiometricAuthenticator, BiometricError};
use crate::auth::models::Credentials;
use crate::auth::token_store::{MemoryTokenStore, TokenStore};
use crate::errors::Result;
use crate::health::{HealthProbe, HealthStatus};
use crate::http::{ApiClient, EndpointList};

/// Token store that counts how often it was cleared
#[derive(Debug, Default)]
pub struct CountingTokenStore {
    inner: MemoryTokenStore,
    clears: AtomicUsize,
}

impl CountingTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        Self {
            inner: MemoryTokenStore::with_token(token),
            clears: AtomicUsize::new(0),
        }
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl TokenStore for CountingTokenStore {
    fn get(&self) -> Option<String> {
        self.inner.get()
    }

    fn set(&self, token: String) -> Result<()> {
        self.inner.set(token)
    }

    fn clear(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear()
    }

    fn clear_if(&self, expected: &str) -> Result<bool> {
        let cleared = self.inner.clear_if(expected)?;
        if cleared {
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        Ok(cleared)
    }
}

/// Client pointed at a wiremock server
pub fn client_for(server: &MockServer, tokens: Arc<dyn TokenStore>) -> ApiClient {
    let base = Url::parse(&server.uri()).expect("mock server uri");
    ApiClient::new(EndpointList::new(base), tokens, Duration::from_secs(5)).expect("Failed to create client")
}

/// Client whose only endpoint refuses connections
pub fn unreachable_client(tokens: Arc<dyn TokenStore>) -> ApiClient {
    let base = Url::parse("http://127.0.0.1:1").expect("static url");
    ApiClient::new(EndpointList::new(base), tokens, Duration::from_secs(2)).expect("Failed to create client")
}

/// `POST /auth/login` response for ada@example.com
pub fn login_body(token: &str) -> Value {
    json!({
        "access_token": token,
        "token_type": "bearer",
        "expires_in": 3600,
        "user": {"id": 1, "username": "ada", "email": "ada@example.com"},
        "session_id": "sess-1",
        "totp_enabled": false
    })
}

/// `GET /auth/me` response for ada@example.com
pub fn me_body() -> Value {
    json!({
        "id": 1,
        "username": "ada",
        "email": "ada@example.com",
        "is_verified": true,
        "email_verified": true,
        "created_at": "2025-01-02T03:04:05Z",
        "updated_at": "2025-03-01T10:00:00Z",
        "last_login": "2025-03-01T10:00:00Z",
        "role_id": 2
    })
}

/// Biometric prompt with a fixed answer
pub struct FakeBiometric {
    result: std::result::Result<Credentials, BiometricError>,
}

impl FakeBiometric {
    pub fn unlocks(credentials: Credentials) -> Self {
        Self { result: Ok(credentials) }
    }

    pub fn fails(message: &str) -> Self {
        Self {
            result: Err(BiometricError(message.to_string())),
        }
    }
}

#[async_trait]
impl BiometricAuthenticator for FakeBiometric {
    async fn authenticate(&self, _reason: &str) -> std::result::Result<Credentials, BiometricError> {
        self.result.clone()
    }
}

/// Health probe that records every URL it was asked about
pub struct RecordingProbe {
    status: HealthStatus,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl RecordingProbe {
    pub fn returning(status: HealthStatus) -> Self {
        Self {
            status,
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl HealthProbe for RecordingProbe {
    async fn probe(&self, base: &Url) -> HealthStatus {
        self.calls.lock().unwrap().push(base.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.status
    }
}
