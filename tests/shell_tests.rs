mod common;

use std::sync::Arc;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use barachiel::api::{build_http_client, InstanceRegistry, SessionManager};
use barachiel::config::Credentials;
use barachiel::dispatcher::Dispatcher;
use barachiel::shell::{History, Input, ScriptedSource, Shell, ShellState, DEFAULT_PROMPT};
use barachiel::Error;

use common::*;

fn shell(dispatcher: Dispatcher, lines: &[&str]) -> Shell<ScriptedSource, Vec<u8>> {
    Shell::new(dispatcher, ScriptedSource::new(lines.iter().copied()), Vec::new())
}

fn printed(shell: &Shell<ScriptedSource, Vec<u8>>) -> String {
    String::from_utf8_lossy(shell.output()).into_owned()
}

async fn mock_show(server: &MockServer, id: &str, name: &str) {
    let body = json!({ "server": server_json(id, name, "ACTIVE") });
    let path = compute_path(&format!("/servers/{}", id));
    server
        .mock_async(move |when, then| {
            when.method(GET).path(path);
            then.status(200).json_body(body);
        })
        .await;
}

#[tokio::test]
async fn test_recoverable_error_keeps_the_shell_running() {
    yansi::disable();
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path(compute_path(&format!("/servers/{}", MISSING_ID)));
            then.status(404);
        })
        .await;
    mock_show(&server, WEB1_ID, "web-1").await;
    let delete_line = format!("delete {} --yes", MISSING_ID);
    let show_line = format!("show {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&delete_line, &show_line]);

    shell.run().await.unwrap();

    let out = printed(&shell);
    assert!(out.contains(&format!("delete {}: no such instance", MISSING_ID)), "output: {}", out);
    assert!(out.contains("web-1"), "output: {}", out);
    assert_eq!(shell.state(), ShellState::Terminated);
    assert_eq!(shell.history().len(), 2);
}

#[tokio::test]
async fn test_token_expiring_between_commands_is_renewed_silently() {
    yansi::disable();
    let server = MockServer::start_async().await;
    // Each token is already inside the renewal margin, so every command renews.
    let keystone = mock_keystone(&server, "tok-short", chrono::Duration::seconds(30)).await;
    mock_show(&server, WEB1_ID, "web-1").await;
    let show_line = format!("show {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&show_line, &show_line]);

    shell.run().await.unwrap();

    keystone.assert_hits_async(2).await;
    let out = printed(&shell);
    assert_eq!(out.matches(WEB1_ID).count(), 2, "output: {}", out);
    assert!(!out.contains("error"), "output: {}", out);
    assert!(!out.contains("session"), "output: {}", out);
}

#[tokio::test]
async fn test_declined_confirmation_sends_nothing() {
    let server = MockServer::start_async().await;
    let keystone = mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let delete = server
        .mock_async(|when, then| {
            when.method(DELETE).path(compute_path(&format!("/servers/{}", WEB1_ID)));
            then.status(204);
        })
        .await;
    let delete_line = format!("delete {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&delete_line, "n"]);

    shell.run().await.unwrap();

    delete.assert_hits_async(0).await;
    keystone.assert_hits_async(0).await;
    assert!(printed(&shell).contains("cancelled"));
    assert_eq!(
        shell.source().prompts()[1],
        format!("delete {}? [y/N] ", WEB1_ID)
    );
}

#[tokio::test]
async fn test_accepted_confirmation_sends_the_request() {
    yansi::disable();
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let stop = server
        .mock_async(|when, then| {
            when.method(POST)
                .path(compute_path(&format!("/servers/{}/action", WEB1_ID)))
                .json_body(json!({ "os-stop": null }));
            then.status(202);
        })
        .await;
    let stop_line = format!("stop {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&stop_line, "y"]);

    shell.run().await.unwrap();

    stop.assert_hits_async(1).await;
    assert!(printed(&shell).contains("Accepted stop"));
}

#[tokio::test]
async fn test_confirmation_can_be_turned_off() {
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let stop = server
        .mock_async(|when, then| {
            when.method(POST).path(compute_path(&format!("/servers/{}/action", WEB1_ID)));
            then.status(202);
        })
        .await;
    let stop_line = format!("stop {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&stop_line]).with_confirmation(false);

    shell.run().await.unwrap();

    stop.assert_hits_async(1).await;
    assert_eq!(shell.source().prompts(), &[DEFAULT_PROMPT.to_string(), DEFAULT_PROMPT.to_string()]);
}

#[tokio::test]
async fn test_quit_stops_reading() {
    let server = MockServer::start_async().await;
    let mut shell = shell(dispatcher(&server), &["help", "quit", "list"]);

    shell.run().await.unwrap();

    assert_eq!(shell.state(), ShellState::Terminated);
    assert_eq!(shell.source().prompts().len(), 2);
    assert!(printed(&shell).contains("Commands:"));
}

#[tokio::test]
async fn test_invalid_input_is_reported_and_skipped() {
    yansi::disable();
    let server = MockServer::start_async().await;
    let keystone = mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    let mut shell = shell(dispatcher(&server), &["frobnicate", "start", "", "   "]);

    shell.run().await.unwrap();

    let out = printed(&shell);
    assert!(out.contains("unknown command 'frobnicate'"), "output: {}", out);
    assert!(out.contains("start: start needs an instance id or name"), "output: {}", out);
    keystone.assert_hits_async(0).await;
    assert_eq!(shell.history().iter().collect::<Vec<_>>(), vec!["frobnicate", "start"]);
}

#[tokio::test]
async fn test_interrupt_at_prompt_is_ignored() {
    let server = MockServer::start_async().await;
    let mut source = ScriptedSource::default();
    source.push(Input::Interrupted);
    source.push(Input::Line("quit".into()));
    let mut shell = Shell::new(dispatcher(&server), source, Vec::new());

    shell.run().await.unwrap();

    assert_eq!(shell.source().prompts().len(), 2);
    assert_eq!(shell.state(), ShellState::Terminated);
}

#[tokio::test]
async fn test_interrupted_start_warns_and_the_loop_continues() {
    yansi::disable();
    let server = MockServer::start_async().await;
    mock_keystone(&server, "tok-1", chrono::Duration::hours(1)).await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path(compute_path(&format!("/servers/{}/action", WEB1_ID)))
                .json_body(json!({ "os-start": null }));
            then.status(202).delay(Duration::from_secs(2));
        })
        .await;
    let start_line = format!("start {}", WEB1_ID);
    let mut shell = shell(dispatcher(&server), &[&start_line, "help"])
        .with_interrupt(|| tokio::time::sleep(Duration::from_millis(100)));

    shell.run().await.unwrap();

    let out = printed(&shell);
    assert!(
        out.contains(&format!(
            "start {}: interrupted; the request may already have been accepted, check with 'show'",
            WEB1_ID
        )),
        "output: {}",
        out
    );
    assert!(!out.contains("Accepted start"), "output: {}", out);
    assert!(out.contains("Commands:"), "output: {}", out);
    assert_eq!(shell.source().prompts().len(), 3);
    assert_eq!(shell.state(), ShellState::Terminated);
}

#[tokio::test]
async fn test_session_loss_ends_the_shell_with_error() {
    let client = build_http_client(Duration::from_secs(2)).unwrap();
    let creds = Credentials::new("http://127.0.0.1:1", "demo", "alice", "s3cret");
    let session = Arc::new(SessionManager::new(client, creds, &settings()));
    let dispatcher = Dispatcher::new(InstanceRegistry::new(session, 100));
    let mut shell = shell(dispatcher, &["list", "list"]);

    let err = shell.run().await.unwrap_err();

    assert!(matches!(err, Error::Session(_)), "got {:?}", err);
    assert_eq!(shell.state(), ShellState::Terminated);
    assert_eq!(shell.source().prompts().len(), 1);
}

#[test]
fn test_history_skips_blanks_and_repeats() {
    let mut history = History::with_capacity(3);

    assert!(history.push("list"));
    assert!(!history.push("list"));
    assert!(!history.push("   "));
    assert!(history.push("show web-1"));
    assert!(history.push("list"));
    assert!(history.push("quit"));

    assert_eq!(history.len(), 3);
    assert_eq!(history.iter().collect::<Vec<_>>(), vec!["show web-1", "list", "quit"]);
    assert_eq!(history.last(), Some("quit"));
}
