pub mod utils;

use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::AppContext;
use crate::auth::{AuthStep, IdentifierOutcome, TokenStore};
use crate::config::{Config, FallbackEndpoint};
use crate::health::HealthStatus;
use crate::models::User;
use crate::resources::ListQuery;
use crate::state::StateFile;
use utils::{login_body, me_body};

fn test_config(server: &MockServer, dir: &TempDir) -> Config {
    Config {
        api_url: server.uri(),
        state_file: Some(dir.path().join("state.json")),
        ..Default::default()
    }
}

/// Sign in through the identifier flow, restart, and lose the session to a 401
#[test_log::test(tokio::test)]
async fn test_session_lifecycle_across_restarts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("POST"))
        .and(path("/auth/check-email"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"exists": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("tok-e2e")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .and(header("authorization", "Bearer tok-e2e"))
        .respond_with(ResponseTemplate::new(200).set_body_json(me_body()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({"detail": "Token revoked"})))
        .expect(1)
        .mount(&server)
        .await;

    // First run: sign in
    {
        let ctx = AppContext::from_config(test_config(&server, &dir), None).unwrap();
        let mut flow = ctx.identifier_flow();
        flow.set_email("ada@example.com");
        assert_eq!(flow.submit_identifier().await.unwrap(), IdentifierOutcome::ExistingAccount);
        assert_eq!(flow.step(), AuthStep::Password);
        flow.set_password("correct horse");
        flow.submit_password().await.unwrap();
        assert!(ctx.session().is_authenticated());
    }

    let state = StateFile::new(dir.path().join("state.json")).load().unwrap();
    assert_eq!(state.access_token.as_deref(), Some("tok-e2e"));

    // Second run: the saved token restores the session
    let ctx = AppContext::from_config(test_config(&server, &dir), None).unwrap();
    ctx.session().initialize().await;
    assert!(ctx.session().is_authenticated());
    assert!(ctx.session().user().unwrap().email_verified);

    // The server revokes the token; the next call tears the session down
    let mut updates = ctx.session().subscribe();
    let err = ctx.resources().list::<User>(&ListQuery::default()).await.unwrap_err();
    assert!(err.is_unauthorized());

    tokio::time::timeout(Duration::from_secs(1), updates.wait_for(|s| !s.is_authenticated()))
        .await
        .expect("session should be cleared")
        .unwrap();
    let state = StateFile::new(dir.path().join("state.json")).load().unwrap();
    assert_eq!(state.access_token, None);
}

#[tokio::test]
async fn test_set_api_url_forgets_token_and_applies_next_start() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "degraded"})))
        .expect(1)
        .mount(&other)
        .await;

    let state = StateFile::new(dir.path().join("state.json"));
    state.update(|s| s.access_token = Some("issued-by-first".to_string())).unwrap();

    let ctx = AppContext::from_config(test_config(&server, &dir), None).unwrap();
    let saved = ctx.set_api_url(&other.uri()).unwrap();
    assert_eq!(saved, Url::parse(&other.uri()).unwrap());
    assert_eq!(ctx.client().tokens().get(), None);

    let restarted = AppContext::from_config(test_config(&server, &dir), None).unwrap();
    assert_eq!(restarted.client().base_url(), &saved);
    assert_eq!(restarted.health().check_now().await, HealthStatus::Degraded);
}

#[tokio::test]
async fn test_explicit_url_overrides_saved_url() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let state = StateFile::new(dir.path().join("state.json"));
    state.update(|s| s.api_url = Some("https://saved.example.com".to_string())).unwrap();

    let ctx = AppContext::from_config(test_config(&server, &dir), Some("override.example.com")).unwrap();

    assert_eq!(ctx.client().base_url().as_str(), "https://override.example.com/");
    assert_eq!(ctx.client().endpoints().len(), 1);
}

#[tokio::test]
async fn test_fallbacks_only_apply_to_configured_api() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&server, &dir);
    config.fallback_endpoints = vec![FallbackEndpoint {
        url: Url::parse("http://203.0.113.10").unwrap(),
        host: Some("api.truledgr.app".to_string()),
    }];

    let ctx = AppContext::from_config(config.clone(), None).unwrap();
    assert_eq!(ctx.client().endpoints().len(), 2);

    let custom = AppContext::from_config(config, Some("self-hosted.example.com")).unwrap();
    assert_eq!(custom.client().endpoints().len(), 1);
}

#[tokio::test]
async fn test_corrupt_state_file_starts_signed_out() {
    let server = MockServer::start().await;
    let other = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("state.json"), "{oops").unwrap();

    let ctx = AppContext::from_config(test_config(&server, &dir), None).unwrap();
    assert_eq!(ctx.client().base_url(), &Url::parse(&server.uri()).unwrap());
    assert_eq!(ctx.client().tokens().get(), None);

    ctx.session().initialize().await;
    assert!(!ctx.session().is_authenticated());
    ctx.session().logout(false).await;

    // The damaged file is kept aside and the state can be written again
    let backup = std::fs::read_to_string(dir.path().join("state.json.corrupt")).unwrap();
    assert_eq!(backup, "{oops");
    let saved = ctx.set_api_url(&other.uri()).unwrap();
    let state = StateFile::new(dir.path().join("state.json")).load().unwrap();
    assert_eq!(state.api_url.as_deref(), Some(saved.as_str()));
}

#[tokio::test]
async fn test_health_check_falls_back_for_configured_api() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    Mock::given(method("GET"))
        .and(path("/health"))
        .and(header("host", "api.truledgr.app"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"status": "healthy"})))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        api_url: "http://127.0.0.1:1".to_string(),
        fallback_endpoints: vec![FallbackEndpoint {
            url: Url::parse(&server.uri()).unwrap(),
            host: Some("api.truledgr.app".to_string()),
        }],
        state_file: Some(dir.path().join("state.json")),
        ..Default::default()
    };

    let ctx = AppContext::from_config(config, None).unwrap();
    assert_eq!(ctx.health().check_now().await, HealthStatus::Healthy);
}
