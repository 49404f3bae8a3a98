use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use yansi::Paint;

use crate::error::{Error, Result};

pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

static TRACE: AtomicBool = AtomicBool::new(false);

pub fn set_trace(trace: bool) {
    TRACE.store(trace, Ordering::Relaxed);
}

fn trace_output(msg: String) {
    if TRACE.load(Ordering::Relaxed) {
        eprintln!("{}", msg);
    }
}

/// Shared HTTP client. The timeout bounds every remote call.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("barachiel/{}", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Configuration(format!("cannot build HTTP client: {}", e)))
}

/// A response with any status. Mapping statuses to errors is the caller's job.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Best-effort human text for an error body.
    pub fn message(&self) -> String {
        remote_message(&self.body)
    }
}

/// Longest remote message shown to the operator, in characters
pub const MAX_MESSAGE_CHARS: usize = 200;

/// Pulls `message` out of Keystone (`{"error": {...}}`) and Nova
/// (`{"itemNotFound": {...}}`) error envelopes. The result is always one line.
pub fn remote_message(body: &Value) -> String {
    let raw = match body {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(obj) => match obj.get("message").and_then(|m| m.as_str()) {
            Some(msg) => msg.to_string(),
            None => obj
                .values()
                .find_map(|v| v.get("message").and_then(|m| m.as_str()))
                .map(|m| m.to_string())
                .unwrap_or_else(|| body.to_string()),
        },
        other => other.to_string(),
    };
    one_line(&raw, MAX_MESSAGE_CHARS)
}

/// Collapses runs of whitespace to single spaces and cuts the text at `max` characters.
pub fn one_line(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max).collect();
    cut.push('…');
    cut
}

fn redact(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .map(|(k, v)| {
                    if k == "password" && v.is_string() {
                        (k.clone(), Value::String("***".into()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(arr) => Value::Array(arr.iter().map(redact).collect()),
        other => other.clone(),
    }
}

fn log_curl(method: &Method, url: &str, token: Option<&str>, headers: &[(&str, &str)], body: Option<&Value>) {
    if !TRACE.load(Ordering::Relaxed) {
        return;
    }
    let mut parts = Vec::new();
    parts.push(Paint::new("curl").fg(yansi::Color::Green).bold().to_string());
    parts.push(format!("-X {}", Paint::new(method.as_str()).fg(yansi::Color::Yellow).bold()));
    parts.push(format!("'{}'", Paint::new(url).fg(yansi::Color::Cyan)));

    if token.is_some() {
        parts.push(format!(
            "{} {}",
            Paint::new("-H").fg(yansi::Color::Magenta),
            Paint::new(format!("'{}: ***'", AUTH_TOKEN_HEADER)).fg(yansi::Color::Magenta)
        ));
    }
    for (name, value) in headers {
        parts.push(format!(
            "{} {}",
            Paint::new("-H").fg(yansi::Color::Magenta),
            Paint::new(format!("'{}: {}'", name, value)).fg(yansi::Color::Magenta)
        ));
    }
    if let Some(d) = body {
        let json_str = serde_json::to_string(&redact(d)).unwrap_or_default();
        let escaped_json = json_str.replace('\'', "'\\''");
        parts.push(format!(
            "{} {}",
            Paint::new("-H").fg(yansi::Color::Magenta),
            Paint::new("'Content-Type: application/json'").fg(yansi::Color::Magenta)
        ));
        parts.push(format!(
            "{} {}",
            Paint::new("-d").fg(yansi::Color::Blue),
            Paint::new(format!("'{}'", escaped_json)).fg(yansi::Color::White)
        ));
    }
    trace_output(parts.join(" "));
}

/// Core HTTP call used by the identity and compute clients.
/// Transport failures and timeouts come back as `Error::Network`;
/// every HTTP status, including errors, comes back as `Ok`.
pub async fn api_call(
    client: &reqwest::Client,
    method: Method,
    url: &str,
    token: Option<&str>,
    body: Option<&Value>,
    params: &[(String, String)],
    headers: &[(&str, &str)],
) -> Result<ApiResponse> {
    log_curl(&method, url, token, headers, body);

    let mut req = client.request(method.clone(), url);
    if let Some(t) = token {
        req = req.header(AUTH_TOKEN_HEADER, t);
    }
    for (name, value) in headers {
        req = req.header(*name, *value);
    }
    if !params.is_empty() {
        req = req.query(params);
    }
    if let Some(b) = body {
        req = req.json(b);
    }

    let resp = req.send().await.map_err(|e| {
        tracing::debug!(%e, %method, url, "request failed");
        Error::from(e)
    })?;
    let status = resp.status();
    let headers = resp.headers().clone();
    let text = resp.text().await.map_err(Error::from)?;
    let body = if text.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    };

    let response_str = Paint::new(format!("HTTP {} {}", status.as_u16(), body)).rgb(100, 100, 100).to_string();
    trace_output(response_str);
    tracing::debug!(%method, url, status = status.as_u16(), "response received");

    Ok(ApiResponse { status, headers, body })
}
