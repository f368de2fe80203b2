//! Shared test helpers for `cloudlink-infra` integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cloudlink_domain::{ClientConfig, EndpointRole};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

pub const TOKEN_PATH: &str = "/oauth/token";

/// Client configuration pointing every URL at `server`.
pub fn config_for(server: &MockServer, role: EndpointRole) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.role = role;
    config.server.base_url = server.uri();
    config.server.endpoint_id = "device-7".into();
    config.server.request_timeout_ms = 2_000;
    config.server.use_system_proxy = false;
    config.credentials.token_url = format!("{}{TOKEN_PATH}", server.uri());
    config.credentials.client_id = "client".into();
    config.credentials.client_secret = "secret".into();
    config.dispatch.polling_interval_ms = 20;
    config.storage.chunk_size = 4;
    config
}

/// Token endpoint issuing `t1`, `t2`, ... one per request. Returns the issue
/// counter.
pub async fn mount_token_endpoint(server: &MockServer) -> Arc<AtomicUsize> {
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&issued);
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(move |_: &Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": format!("t{n}"),
                "token_type": "Bearer",
                "expires_in": 3600
            }))
        })
        .mount(server)
        .await;
    issued
}

/// Poll `check` every 10 ms until it holds or `limit` elapses.
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub fn bearer(request: &Request) -> Option<String> {
    request.headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_string)
}
