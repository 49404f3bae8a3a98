//! Token lifecycle against the Keystone v3 identity API.
//!
//! A [`SessionManager`] owns the only [`Session`] in the process. Every caller
//! that needs a token goes through [`SessionManager::valid_session`], which
//! hands out the held token while it is comfortably inside its lifetime and
//! otherwise renews it. Renewal happens under a single async mutex, so callers
//! that arrive while a renewal is in flight wait for that renewal instead of
//! starting their own.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;

use super::client::{api_call, ApiResponse};
use crate::config::{Credentials, Settings};
use crate::error::{Error, Result};

pub const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";

/// How many extra attempts a renewal gets after a network failure
pub const MAX_REAUTH_RETRIES: u32 = 1;

/// Opaque bearer token. `Debug` never shows the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

/// A token, when it stops being valid, and where the compute API lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: Token,
    expires_at: DateTime<Utc>,
    compute_url: String,
}

impl Session {
    pub fn new(token: Token, expires_at: DateTime<Utc>, compute_url: impl Into<String>) -> Self {
        Self {
            token,
            expires_at,
            compute_url: compute_url.into(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn compute_url(&self) -> &str {
        &self.compute_url
    }

    /// True while more than `margin` of lifetime is left at `now`.
    pub fn is_usable_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at - now > margin
    }
}

#[derive(Debug, Deserialize)]
struct TokenEnvelope {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    expires_at: String,
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_id: Option<String>,
    url: String,
}

/// Owns the session and renews it when needed.
pub struct SessionManager {
    client: reqwest::Client,
    credentials: Credentials,
    margin: Duration,
    backoff: Duration,
    interface: String,
    compute_override: Option<String>,
    current: Mutex<Option<Session>>,
}

impl SessionManager {
    pub fn new(client: reqwest::Client, credentials: Credentials, settings: &Settings) -> Self {
        Self {
            client,
            credentials,
            margin: settings.token_margin,
            backoff: settings.backoff,
            interface: settings.interface.clone(),
            compute_override: settings.compute_url.clone(),
            current: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Issues one authentication request and keeps the resulting session.
    pub async fn authenticate(&self) -> Result<Session> {
        let mut guard = self.current.lock().await;
        let session = self.request_token().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    /// Returns a session whose token is good for longer than the safety margin,
    /// renewing it first when it is not.
    pub async fn valid_session(&self) -> Result<Session> {
        let mut guard = self.current.lock().await;
        if let Some(session) = guard.as_ref() {
            if session.is_usable_at(Utc::now(), self.margin) {
                return Ok(session.clone());
            }
            tracing::info!(expires_at = %session.expires_at, "token close to expiry, renewing");
        }
        let fresh = self.renew().await?;
        *guard = Some(fresh.clone());
        Ok(fresh)
    }

    /// Drops the held session if it still carries `token`.
    /// A newer session obtained by someone else is left alone.
    pub async fn invalidate(&self, token: &Token) {
        let mut guard = self.current.lock().await;
        if guard.as_ref().map(|s| s.token() == token).unwrap_or(false) {
            tracing::info!("token rejected by the compute API, dropping it");
            *guard = None;
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    async fn renew(&self) -> Result<Session> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match self.request_token().await {
                Ok(session) => return Ok(session),
                Err(Error::Network(msg)) if attempt < MAX_REAUTH_RETRIES => {
                    attempt += 1;
                    let wait = jittered(delay);
                    tracing::warn!(attempt, ?wait, error = %msg, "re-authentication failed, retrying");
                    tokio::time::sleep(wait).await;
                    delay *= 2;
                }
                Err(Error::Network(msg)) => {
                    tracing::error!(error = %msg, "re-authentication failed, giving up");
                    return Err(Error::Session(format!(
                        "could not renew the token after {} attempts: {}",
                        attempt + 1,
                        msg
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn request_token(&self) -> Result<Session> {
        let creds = &self.credentials;
        let url = tokens_url(creds.auth_url());
        let body = json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": creds.username(),
                            "domain": { "name": creds.user_domain() },
                            "password": creds.password(),
                        }
                    }
                },
                "scope": {
                    "project": {
                        "name": creds.project(),
                        "domain": { "name": creds.project_domain() },
                    }
                }
            }
        });

        tracing::debug!(user = creds.username(), project = creds.project(), "requesting token");
        let resp = api_call(&self.client, Method::POST, &url, None, Some(&body), &[], &[]).await?;
        let session = self.session_from_response(resp)?;
        tracing::info!(expires_at = %session.expires_at, compute = %session.compute_url, "authenticated");
        Ok(session)
    }

    fn session_from_response(&self, resp: ApiResponse) -> Result<Session> {
        match resp.status.as_u16() {
            200..=299 => {}
            401 | 403 => return Err(Error::Authentication(non_empty_or(resp.message(), "credentials rejected"))),
            status => {
                return Err(Error::Remote {
                    status,
                    body: resp.message(),
                })
            }
        }

        let token = resp
            .headers
            .get(SUBJECT_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(Token::new)
            .ok_or_else(|| Error::Remote {
                status: resp.status.as_u16(),
                body: format!("identity response carried no {} header", SUBJECT_TOKEN_HEADER),
            })?;

        let envelope: TokenEnvelope = serde_json::from_value(resp.body).map_err(|e| Error::Remote {
            status: resp.status.as_u16(),
            body: format!("unexpected token body: {}", e),
        })?;

        let expires_at = DateTime::parse_from_rfc3339(&envelope.token.expires_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| Error::Remote {
                status: resp.status.as_u16(),
                body: format!("unparseable token expiry '{}': {}", envelope.token.expires_at, e),
            })?;

        let compute_url = match &self.compute_override {
            Some(url) => url.clone(),
            None => self.compute_endpoint(&envelope.token.catalog)?,
        };

        Ok(Session::new(token, expires_at, compute_url))
    }

    fn compute_endpoint(&self, catalog: &[CatalogEntry]) -> Result<String> {
        let region = self.credentials.region();
        catalog
            .iter()
            .filter(|entry| entry.service_type == "compute")
            .flat_map(|entry| entry.endpoints.iter())
            .find(|ep| {
                ep.interface == self.interface
                    && region
                        .map(|r| ep.region.as_deref() == Some(r) || ep.region_id.as_deref() == Some(r))
                        .unwrap_or(true)
            })
            .map(|ep| ep.url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::Configuration(match region {
                    Some(r) => format!("no {} compute endpoint for region '{}' in the service catalog", self.interface, r),
                    None => format!("no {} compute endpoint in the service catalog", self.interface),
                })
            })
    }
}

/// `https://keystone:5000` and `https://keystone:5000/v3` both end up at `/v3/auth/tokens`.
pub fn tokens_url(auth_url: &str) -> String {
    let base = auth_url.trim_end_matches('/');
    if base.ends_with("/v3") {
        format!("{}/auth/tokens", base)
    } else {
        format!("{}/v3/auth/tokens", base)
    }
}

fn jittered(delay: Duration) -> Duration {
    let ms = delay.as_millis() as u64;
    let extra = if ms >= 4 {
        rand::thread_rng().gen_range(0..=ms / 4)
    } else {
        0
    };
    Duration::from_millis(ms + extra)
}

fn non_empty_or(msg: String, fallback: &str) -> String {
    if msg.is_empty() {
        fallback.to_string()
    } else {
        msg
    }
}
