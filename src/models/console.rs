use serde::{Deserialize, Serialize};

/// Connection details for a remote console session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleAccess {
    pub protocol: String,
    #[serde(rename = "type")]
    pub console_type: String,
    pub url: String,
}
