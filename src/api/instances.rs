use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use super::client::{api_call, ApiResponse};
use super::session::SessionManager;
use crate::error::{Error, Result};
use crate::models::instance::ServerRecord;
use crate::models::{ConsoleAccess, Instance, InstanceStatus};

/// Microversion that introduced `remote-consoles`
pub const CONSOLE_MICROVERSION: &str = "2.6";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub status: Option<InstanceStatus>,
    /// Exact instance name
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServerList {
    #[serde(default)]
    servers: Vec<ServerRecord>,
    #[serde(default)]
    servers_links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    rel: String,
    href: String,
}

#[derive(Debug, Deserialize)]
struct ServerEnvelope {
    server: ServerRecord,
}

#[derive(Debug, Deserialize)]
struct ConsoleEnvelope {
    remote_console: ConsoleAccess,
}

enum Cursor {
    First,
    Next(String),
}

/// Nova client. Every call asks the session manager for a token first.
pub struct InstanceRegistry {
    session: Arc<SessionManager>,
    page_size: usize,
}

impl InstanceRegistry {
    pub fn new(session: Arc<SessionManager>, page_size: usize) -> Self {
        Self {
            session,
            page_size: page_size.max(1),
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// A lazy listing. Nothing is fetched until the query is driven, and
    /// driving it again starts over from the first page.
    pub fn list(&self, filter: ListFilter) -> InstanceQuery<'_> {
        InstanceQuery { registry: self, filter }
    }

    pub async fn show(&self, id: &str) -> Result<Instance> {
        tracing::debug!(id, "show instance");
        let resp = self
            .compute_call(Method::GET, &format!("/servers/{}", id), None, &[], &[])
            .await?;
        check_status(&resp, id)?;
        let envelope: ServerEnvelope = decode(resp)?;
        Ok(envelope.server.into())
    }

    /// Looks an instance up by id, or by exact name when the target is not a UUID.
    pub async fn find(&self, target: &str) -> Result<Instance> {
        if is_instance_id(target) {
            return self.show(target).await;
        }
        let mut matches = self
            .list(ListFilter {
                status: None,
                name: Some(target.to_string()),
            })
            .collect()
            .await?;
        match matches.len() {
            0 => Err(Error::NotFound(target.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(Error::InvalidArgument(format!(
                "'{}' matches several instances ({}); use an id",
                target,
                matches.iter().map(|i| i.id.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Turns a target into an instance id. Ids are taken as they are.
    pub async fn resolve(&self, target: &str) -> Result<String> {
        if is_instance_id(target) {
            return Ok(target.to_string());
        }
        self.find(target).await.map(|i| i.id)
    }

    pub async fn start(&self, id: &str) -> Result<()> {
        self.action(id, json!({ "os-start": null })).await
    }

    pub async fn stop(&self, id: &str) -> Result<()> {
        self.action(id, json!({ "os-stop": null })).await
    }

    pub async fn reboot(&self, id: &str, hard: bool) -> Result<()> {
        let kind = if hard { "HARD" } else { "SOFT" };
        self.action(id, json!({ "reboot": { "type": kind } })).await
    }

    pub async fn delete(&self, id: &str, force: bool) -> Result<()> {
        if force {
            return self.action(id, json!({ "forceDelete": null })).await;
        }
        tracing::info!(id, "delete instance");
        let resp = self
            .compute_call(Method::DELETE, &format!("/servers/{}", id), None, &[], &[])
            .await?;
        check_status(&resp, id)
    }

    pub async fn console(&self, id: &str) -> Result<ConsoleAccess> {
        let body = json!({ "remote_console": { "protocol": "vnc", "type": "novnc" } });
        let compute_version = format!("compute {}", CONSOLE_MICROVERSION);
        let headers = [
            ("X-OpenStack-Nova-API-Version", CONSOLE_MICROVERSION),
            ("OpenStack-API-Version", compute_version.as_str()),
        ];
        let resp = self
            .compute_call(
                Method::POST,
                &format!("/servers/{}/remote-consoles", id),
                Some(&body),
                &[],
                &headers,
            )
            .await?;
        check_status(&resp, id)?;
        let envelope: ConsoleEnvelope = decode(resp)?;
        Ok(envelope.remote_console)
    }

    /// Issues a server action. It is accepted or rejected, never awaited.
    async fn action(&self, id: &str, body: Value) -> Result<()> {
        tracing::info!(id, action = %body, "instance action");
        let resp = self
            .compute_call(Method::POST, &format!("/servers/{}/action", id), Some(&body), &[], &[])
            .await?;
        check_status(&resp, id)
    }

    async fn fetch_page(&self, filter: &ListFilter, cursor: Cursor) -> Result<(Vec<Instance>, Option<String>)> {
        let resp = match cursor {
            Cursor::First => {
                let mut params = vec![("limit".to_string(), self.page_size.to_string())];
                if let Some(remote) = filter.status.and_then(|s| s.remote_filter()) {
                    params.push(("status".to_string(), remote.to_string()));
                }
                if let Some(name) = &filter.name {
                    // Nova matches `name` as a regular expression.
                    params.push(("name".to_string(), format!("^{}$", regex::escape(name))));
                }
                self.compute_call(Method::GET, "/servers/detail", None, &params, &[]).await?
            }
            Cursor::Next(href) => self.compute_call(Method::GET, &href, None, &[], &[]).await?,
        };
        if !resp.is_success() {
            return Err(Error::Remote {
                status: resp.status.as_u16(),
                body: resp.message(),
            });
        }
        let page: ServerList = decode(resp)?;
        let raw_count = page.servers.len();

        let mut items: Vec<Instance> = page.servers.into_iter().map(Instance::from).collect();
        if let Some(status) = filter.status {
            if status.remote_filter().is_none() {
                items.retain(|i| i.status == status);
            }
        }
        if let Some(name) = &filter.name {
            items.retain(|i| &i.name == name);
        }
        // An empty page ends the listing even if the cloud still offers a link.
        let next = if raw_count == 0 {
            None
        } else {
            page.servers_links.into_iter().find(|l| l.rel == "next").map(|l| l.href)
        };
        tracing::debug!(count = items.len(), more = next.is_some(), "fetched page");
        Ok((items, next))
    }

    /// Sends a compute request with a valid token. A 401 drops the token and
    /// the request is sent once more with a fresh one.
    async fn compute_call(
        &self,
        method: Method,
        path_or_url: &str,
        body: Option<&Value>,
        params: &[(String, String)],
        headers: &[(&str, &str)],
    ) -> Result<ApiResponse> {
        let mut retried = false;
        loop {
            let session = self.session.valid_session().await?;
            let url = if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
                path_or_url.to_string()
            } else {
                format!("{}{}", session.compute_url(), path_or_url)
            };
            let resp = api_call(
                self.session.client(),
                method.clone(),
                &url,
                Some(session.token().as_str()),
                body,
                params,
                headers,
            )
            .await?;
            if resp.status.as_u16() != 401 {
                return Ok(resp);
            }
            if retried {
                return Err(Error::Authentication(format!(
                    "the compute API rejected a freshly issued token: {}",
                    resp.message()
                )));
            }
            self.session.invalidate(session.token()).await;
            retried = true;
        }
    }
}

/// Lazy, restartable view over a paginated listing.
pub struct InstanceQuery<'a> {
    registry: &'a InstanceRegistry,
    filter: ListFilter,
}

impl<'a> InstanceQuery<'a> {
    pub fn filter(&self) -> &ListFilter {
        &self.filter
    }

    /// One item per remote page, in server order.
    pub fn pages(&self) -> impl Stream<Item = Result<Vec<Instance>>> + '_ {
        stream::try_unfold(Some(Cursor::First), move |cursor| async move {
            let Some(cursor) = cursor else {
                return Ok::<_, Error>(None);
            };
            let fetched = match &cursor {
                Cursor::Next(href) => Some(href.clone()),
                Cursor::First => None,
            };
            let (items, next) = self.registry.fetch_page(&self.filter, cursor).await?;
            let next = next.filter(|href| {
                let repeated = fetched.as_ref() == Some(href);
                if repeated {
                    tracing::warn!(href = %href, "next link points at the page just fetched, stopping");
                }
                !repeated
            });
            Ok(Some((items, next.map(Cursor::Next))))
        })
    }

    /// Every page concatenated, or the first error with nothing partial.
    pub async fn collect(&self) -> Result<Vec<Instance>> {
        self.pages().try_concat().await
    }
}

pub fn is_instance_id(target: &str) -> bool {
    uuid::Uuid::parse_str(target).is_ok()
}

fn check_status(resp: &ApiResponse, target: &str) -> Result<()> {
    match resp.status.as_u16() {
        200..=299 => Ok(()),
        404 => Err(Error::NotFound(target.to_string())),
        409 => Err(Error::Conflict(resp.message())),
        status => Err(Error::Remote {
            status,
            body: resp.message(),
        }),
    }
}

fn decode<T: serde::de::DeserializeOwned>(resp: ApiResponse) -> Result<T> {
    let status = resp.status.as_u16();
    serde_json::from_value(resp.body).map_err(|e| Error::Remote {
        status,
        body: format!("unexpected response body: {}", e),
    })
}
