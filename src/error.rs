/// Error taxonomy shared by every layer of the tool
use thiserror::Error;

/// Errors that can occur while talking to the cloud or handling a command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Required configuration is missing or malformed
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The identity service rejected the credentials
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The endpoint could not be reached or the call timed out
    #[error("network error: {0}")]
    Network(String),

    /// The session could not be renewed after retrying
    #[error("session lost: {0}")]
    Session(String),

    /// The remote API has no such instance
    #[error("no instance found for '{0}'")]
    NotFound(String),

    /// The requested state transition is not allowed right now
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other non-success response
    #[error("remote error (HTTP {status}): {body}")]
    Remote {
        status: u16,
        body: String,
    },

    /// The command failed local validation
    #[error("{0}")]
    InvalidArgument(String),

    /// The operator interrupted a blocking call
    #[error("interrupted")]
    Interrupted,
}

impl Error {
    /// Fatal errors end the interactive session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_) | Error::Authentication(_) | Error::Session(_)
        )
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Network("request timed out".into())
        } else if e.is_decode() {
            Error::Remote {
                status: e.status().map(|s| s.as_u16()).unwrap_or(200),
                body: format!("unreadable response: {}", e),
            }
        } else {
            Error::Network(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
