mod common;

use std::time::Duration;

use chrono::Utc;
use httpmock::prelude::*;
use serde_json::json;

use barachiel::api::session::tokens_url;
use barachiel::api::{Session, SessionManager, Token};
use barachiel::config::{Credentials, Settings};
use barachiel::Error;

use common::*;

#[tokio::test]
async fn test_authenticate_reads_token_expiry_and_compute_endpoint() {
    let server = MockServer::start_async().await;
    let keystone = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(TOKENS_PATH)
                .json_body(json!({
                    "auth": {
                        "identity": {
                            "methods": ["password"],
                            "password": {
                                "user": {
                                    "name": "alice",
                                    "domain": { "name": "Default" },
                                    "password": "s3cret"
                                }
                            }
                        },
                        "scope": {
                            "project": { "name": "demo", "domain": { "name": "Default" } }
                        }
                    }
                }));
            then.status(201)
                .header("X-Subject-Token", "tok-1")
                .json_body(token_body(&server, chrono::Duration::hours(1)));
        })
        .await;

    let session = session_manager(&server).authenticate().await.expect("authenticated");

    keystone.assert_async().await;
    assert_eq!(session.token().as_str(), "tok-1");
    assert_eq!(session.compute_url(), server.url(COMPUTE_PREFIX));
    assert!(session.expires_at() > Utc::now() + chrono::Duration::minutes(59));
}

#[tokio::test]
async fn test_rejected_credentials_are_an_authentication_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(TOKENS_PATH);
            then.status(401).json_body(json!({
                "error": { "code": 401, "title": "Unauthorized", "message": "The request you have made requires authentication." }
            }));
        })
        .await;

    let err = session_manager(&server).authenticate().await.unwrap_err();

    assert_eq!(
        err,
        Error::Authentication("The request you have made requires authentication.".into())
    );
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_unreachable_identity_endpoint_is_a_network_error() {
    let client = barachiel::api::build_http_client(Duration::from_secs(2)).unwrap();
    let creds = Credentials::new("http://127.0.0.1:1", "demo", "alice", "s3cret");
    let manager = SessionManager::new(client, creds, &settings());

    let err = manager.authenticate().await.unwrap_err();

    assert!(matches!(err, Error::Network(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_renewal_gives_up_with_session_error_after_one_retry() {
    let client = barachiel::api::build_http_client(Duration::from_secs(2)).unwrap();
    let creds = Credentials::new("http://127.0.0.1:1", "demo", "alice", "s3cret");
    let manager = SessionManager::new(client, creds, &settings());

    let err = manager.valid_session().await.unwrap_err();

    match err {
        Error::Session(msg) => assert!(msg.contains("2 attempts"), "message: {}", msg),
        other => panic!("expected a session error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_compute_endpoint_for_region_is_a_configuration_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path(TOKENS_PATH);
            then.status(201).header("X-Subject-Token", "tok-1").json_body(json!({
                "token": {
                    "expires_at": (Utc::now() + chrono::Duration::hours(1)).to_rfc3339(),
                    "catalog": [{ "type": "compute", "endpoints": [
                        { "interface": "public", "region": "RegionTwo", "url": "http://10.0.0.2:8774/v2.1" }
                    ]}]
                }
            }));
        })
        .await;

    let err = session_manager(&server).authenticate().await.unwrap_err();

    assert!(matches!(err, Error::Configuration(ref m) if m.contains("RegionOne")), "got {:?}", err);
}

#[tokio::test]
async fn test_configured_compute_url_overrides_the_catalog() {
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let manager = session_manager_with(
        &server,
        Settings {
            compute_url: Some("http://nova.internal:8774/v2.1".into()),
            ..settings()
        },
    );

    let session = manager.authenticate().await.unwrap();

    assert_eq!(session.compute_url(), "http://nova.internal:8774/v2.1");
}

#[tokio::test]
async fn test_valid_session_reuses_token_within_its_lifetime() {
    let server = MockServer::start_async().await;
    let keystone = mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let manager = session_manager(&server);

    for _ in 0..5 {
        let session = manager.valid_session().await.unwrap();
        assert_eq!(session.token().as_str(), "tok-1");
    }

    keystone.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_token_inside_safety_margin_is_renewed() {
    let server = MockServer::start_async().await;
    // 30 seconds left is inside the default 60 second margin.
    let keystone = mock_keystone(&server, "tok-short", chrono::Duration::seconds(30)).await;
    let manager = session_manager(&server);

    manager.valid_session().await.unwrap();
    manager.valid_session().await.unwrap();

    keystone.assert_hits_async(2).await;
}

#[tokio::test]
async fn test_concurrent_callers_share_one_authentication() {
    let server = MockServer::start_async().await;
    let body = token_body(&server, chrono::Duration::hours(1));
    let keystone = server
        .mock_async(move |when, then| {
            when.method(POST).path(TOKENS_PATH);
            then.status(201)
                .header("X-Subject-Token", "tok-1")
                .delay(Duration::from_millis(200))
                .json_body(body);
        })
        .await;
    let manager = session_manager(&server);

    let (a, b, c) = tokio::join!(manager.valid_session(), manager.valid_session(), manager.valid_session());

    assert_eq!(a.unwrap().token().as_str(), "tok-1");
    assert_eq!(b.unwrap().token().as_str(), "tok-1");
    assert_eq!(c.unwrap().token().as_str(), "tok-1");
    keystone.assert_hits_async(1).await;
}

#[tokio::test]
async fn test_invalidate_only_drops_the_matching_token() {
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let manager = session_manager(&server);
    manager.authenticate().await.unwrap();

    manager.invalidate(&Token::new("some-older-token")).await;
    assert!(manager.current().await.is_some());

    manager.invalidate(&Token::new("tok-1")).await;
    assert!(manager.current().await.is_none());
}

#[test]
fn test_session_usability_respects_margin() {
    let now = Utc::now();
    let session = Session::new(Token::new("t"), now + chrono::Duration::seconds(90), "http://nova");

    assert!(session.is_usable_at(now, Duration::from_secs(60)));
    assert!(!session.is_usable_at(now + chrono::Duration::seconds(30), Duration::from_secs(60)));
    assert!(!session.is_usable_at(now + chrono::Duration::seconds(120), Duration::from_secs(0)));
}

#[test]
fn test_token_debug_hides_value() {
    assert_eq!(format!("{:?}", Token::new("very-secret")), "Token(***)");
}

#[test]
fn test_tokens_url_adds_version_when_missing() {
    assert_eq!(tokens_url("https://keystone:5000"), "https://keystone:5000/v3/auth/tokens");
    assert_eq!(tokens_url("https://keystone:5000/v3"), "https://keystone:5000/v3/auth/tokens");
    assert_eq!(tokens_url("https://keystone:5000/v3/"), "https://keystone:5000/v3/auth/tokens");
}
