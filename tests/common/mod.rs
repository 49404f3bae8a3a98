#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use httpmock::Mock;
use serde_json::{json, Value};

use barachiel::api::{build_http_client, InstanceRegistry, SessionManager};
use barachiel::config::{Credentials, Settings};
use barachiel::dispatcher::Dispatcher;

pub const TOKENS_PATH: &str = "/v3/auth/tokens";
pub const COMPUTE_PREFIX: &str = "/compute/v2.1";

pub const WEB1_ID: &str = "7f0c2b0e-52a1-4d39-9d0c-1a7a1b2f6c11";
pub const DB1_ID: &str = "1b7d3c55-8f1e-4a4e-9a3b-6c2f0e9d4a22";
pub const MISSING_ID: &str = "00000000-0000-4000-8000-000000000404";

pub fn compute_path(path: &str) -> String {
    format!("{}{}", COMPUTE_PREFIX, path)
}

pub fn token_body(server: &MockServer, lifetime: chrono::Duration) -> Value {
    json!({
        "token": {
            "expires_at": (Utc::now() + lifetime).to_rfc3339(),
            "catalog": [
                {
                    "type": "identity",
                    "name": "keystone",
                    "endpoints": [
                        { "interface": "public", "region": "RegionOne", "url": server.base_url() }
                    ]
                },
                {
                    "type": "compute",
                    "name": "nova",
                    "endpoints": [
                        { "interface": "internal", "region": "RegionOne", "url": "http://10.0.0.1:8774/v2.1" },
                        { "interface": "public", "region": "RegionTwo", "url": "http://10.0.0.2:8774/v2.1" },
                        { "interface": "public", "region": "RegionOne", "url": server.url(COMPUTE_PREFIX) }
                    ]
                }
            ]
        }
    })
}

/// Keystone that issues `token` valid for `lifetime`.
pub async fn mock_keystone<'a>(server: &'a MockServer, token: &str, lifetime: chrono::Duration) -> Mock<'a> {
    let body = token_body(server, lifetime);
    let token = token.to_string();
    server
        .mock_async(move |when, then| {
            when.method(POST).path(TOKENS_PATH);
            then.status(201)
                .header("X-Subject-Token", token.as_str())
                .json_body(body);
        })
        .await
}

pub fn credentials(server: &MockServer) -> Credentials {
    Credentials::new(server.base_url(), "demo", "alice", "s3cret").with_region(Some("RegionOne".into()))
}

pub fn settings() -> Settings {
    Settings {
        timeout: Duration::from_secs(5),
        backoff: Duration::from_millis(1),
        ..Settings::default()
    }
}

pub fn session_manager(server: &MockServer) -> Arc<SessionManager> {
    session_manager_with(server, settings())
}

pub fn session_manager_with(server: &MockServer, settings: Settings) -> Arc<SessionManager> {
    let client = build_http_client(settings.timeout).expect("client");
    Arc::new(SessionManager::new(client, credentials(server), &settings))
}

pub fn registry(server: &MockServer) -> InstanceRegistry {
    InstanceRegistry::new(session_manager(server), 100)
}

pub fn registry_with_page_size(server: &MockServer, page_size: usize) -> InstanceRegistry {
    InstanceRegistry::new(session_manager(server), page_size)
}

pub fn dispatcher(server: &MockServer) -> Dispatcher {
    Dispatcher::new(registry(server))
}

pub fn server_json(id: &str, name: &str, status: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "status": status,
        "hostId": "e4c3a1d2b5",
        "OS-EXT-SRV-ATTR:host": "compute-03",
        "addresses": {
            "private": [
                { "addr": "10.0.0.5", "version": 4, "OS-EXT-IPS:type": "fixed" },
                { "addr": "fd00::5", "version": 6, "OS-EXT-IPS:type": "fixed" }
            ],
            "public": [
                { "addr": "203.0.113.10", "version": 4, "OS-EXT-IPS:type": "floating" }
            ]
        },
        "flavor": { "id": "m1.small" },
        "image": { "id": "c0ffee00-0000-4000-8000-000000000001" },
        "created": "2024-03-01T12:30:00Z"
    })
}
