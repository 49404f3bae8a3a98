use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of an instance, reduced to the states the shell cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    Building,
    Active,
    Paused,
    Suspended,
    Stopped,
    Error,
    Deleted,
    Unknown,
}

impl InstanceStatus {
    pub const ALL: [InstanceStatus; 8] = [
        InstanceStatus::Building,
        InstanceStatus::Active,
        InstanceStatus::Paused,
        InstanceStatus::Suspended,
        InstanceStatus::Stopped,
        InstanceStatus::Error,
        InstanceStatus::Deleted,
        InstanceStatus::Unknown,
    ];

    /// Maps a Nova status string. Anything unrecognised is `Unknown`.
    pub fn from_remote(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUILD" | "BUILDING" => InstanceStatus::Building,
            "ACTIVE" => InstanceStatus::Active,
            "PAUSED" => InstanceStatus::Paused,
            "SUSPENDED" => InstanceStatus::Suspended,
            "SHUTOFF" | "STOPPED" => InstanceStatus::Stopped,
            "ERROR" => InstanceStatus::Error,
            "DELETED" | "SOFT_DELETED" => InstanceStatus::Deleted,
            _ => InstanceStatus::Unknown,
        }
    }

    /// The value Nova expects in the `status` list filter.
    pub fn remote_filter(&self) -> Option<&'static str> {
        match self {
            InstanceStatus::Building => Some("BUILD"),
            InstanceStatus::Active => Some("ACTIVE"),
            InstanceStatus::Paused => Some("PAUSED"),
            InstanceStatus::Suspended => Some("SUSPENDED"),
            InstanceStatus::Stopped => Some("SHUTOFF"),
            InstanceStatus::Error => Some("ERROR"),
            InstanceStatus::Deleted => Some("DELETED"),
            InstanceStatus::Unknown => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Building => "BUILDING",
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Paused => "PAUSED",
            InstanceStatus::Suspended => "SUSPENDED",
            InstanceStatus::Stopped => "STOPPED",
            InstanceStatus::Error => "ERROR",
            InstanceStatus::Deleted => "DELETED",
            InstanceStatus::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    /// Accepts the shell names (`stopped`) as well as Nova's (`SHUTOFF`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match InstanceStatus::from_remote(s) {
            InstanceStatus::Unknown if !s.trim().eq_ignore_ascii_case("unknown") => Err(format!(
                "unknown status '{}' (expected one of: {})",
                s,
                InstanceStatus::ALL
                    .iter()
                    .map(|st| st.as_str().to_lowercase())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            status => Ok(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub network: String,
    pub addr: String,
    pub version: u8,
    /// `fixed` or `floating` when the cloud reports it
    pub kind: Option<String>,
}

/// A virtual machine as the shell sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub status: InstanceStatus,
    pub host: Option<String>,
    pub addresses: Vec<Address>,
    pub flavor: Option<String>,
    pub image: Option<String>,
    pub created: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn addresses_display(&self) -> String {
        if self.addresses.is_empty() {
            return "—".into();
        }
        self.addresses
            .iter()
            .map(|a| format!("{}={}", a.network, a.addr))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Nova `server` object. Only the fields the shell uses are read.
#[derive(Debug, Deserialize)]
pub(crate) struct ServerRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(rename = "OS-EXT-SRV-ATTR:host", default)]
    pub hypervisor_host: Option<String>,
    #[serde(rename = "hostId", default)]
    pub host_id: Option<String>,
    #[serde(default)]
    pub addresses: BTreeMap<String, Vec<AddressRecord>>,
    #[serde(default)]
    pub flavor: Value,
    #[serde(default)]
    pub image: Value,
    #[serde(default)]
    pub created: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AddressRecord {
    pub addr: String,
    #[serde(default = "default_ip_version")]
    pub version: u8,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub kind: Option<String>,
}

fn default_ip_version() -> u8 {
    4
}

fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(obj) => obj
            .get("id")
            .or_else(|| obj.get("original_name"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        _ => None,
    }
}

impl From<ServerRecord> for Instance {
    fn from(raw: ServerRecord) -> Self {
        let host = raw
            .hypervisor_host
            .filter(|h| !h.is_empty())
            .or(raw.host_id.filter(|h| !h.is_empty()));

        let addresses = raw
            .addresses
            .into_iter()
            .flat_map(|(network, entries)| {
                entries.into_iter().map(move |a| Address {
                    network: network.clone(),
                    addr: a.addr,
                    version: a.version,
                    kind: a.kind,
                })
            })
            .collect();

        let created = raw
            .created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map(|c| c.with_timezone(&Utc));

        Instance {
            id: raw.id,
            name: raw.name,
            status: InstanceStatus::from_remote(&raw.status),
            host,
            addresses,
            flavor: reference_id(&raw.flavor),
            image: reference_id(&raw.image),
            created,
        }
    }
}
