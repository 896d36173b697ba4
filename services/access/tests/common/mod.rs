//! Shared fixtures for the access service integration tests

#![allow(dead_code)]

use std::sync::Arc;

use access::{
    AppState, Backends, build_controller,
    access::AccessController,
    clock::{ManualClock, UuidGenerator},
    config::{AccessConfig, RateLimitRule},
    store::MemoryStore,
};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response},
};
use tower::ServiceExt;

pub const SERVICE_TOKEN: &str = "internal-test-token";

pub struct TestCore {
    pub controller: AccessController,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
}

/// Policy used across the tests: registrations 5 per minute, logins 10 per 5 minutes
pub fn test_config() -> AccessConfig {
    let mut config = AccessConfig::default();
    config.session.ttl_seconds = 3600;
    config.session.rotation_window_seconds = 300;
    config.rate_limit.rules = vec![
        RateLimitRule::new("registration", 60, 5),
        RateLimitRule::new("login", 300, 10),
    ];
    config.retry.base_delay_ms = 1;
    config.service_token = Some(SERVICE_TOKEN.to_string());
    config
}

pub fn build_core() -> TestCore {
    build_core_with(test_config())
}

pub fn build_core_with(config: AccessConfig) -> TestCore {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::default());

    let controller = build_controller(
        Backends {
            sessions: store.clone(),
            bans: store.clone(),
            request_log: store.clone(),
            clock: clock.clone(),
            ids: Arc::new(UuidGenerator),
        },
        &config,
    );

    TestCore {
        controller,
        clock,
        store,
    }
}

pub fn build_test_app(core: &TestCore) -> Router {
    access::routes::create_router(AppState {
        controller: core.controller.clone(),
        service_token: Some(SERVICE_TOKEN.to_string()),
    })
}

pub fn device() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Send a request carrying the service token
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", SERVICE_TOKEN));

    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    app.oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
