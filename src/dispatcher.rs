//! Turns parsed commands into registry calls.
//!
//! Validation happens before anything leaves the process: a command that is
//! missing its target or carries an unknown option fails with
//! [`Error::InvalidArgument`] and the cloud never hears about it. State
//! changing verbs are sent once; nothing here retries them.

use std::fmt;

use crate::api::client::one_line;
use crate::api::{InstanceRegistry, ListFilter};
use crate::command::{Command, TargetRule, Verb};
use crate::error::Error;
use crate::models::{ConsoleAccess, Instance, InstanceStatus};

const MAX_ERROR_CHARS: usize = 400;

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Instances(Vec<Instance>),
    Instance(Box<Instance>),
    /// The cloud accepted a state change; it may still be in progress.
    Accepted {
        verb: Verb,
        target: String,
        id: String,
    },
    Console {
        target: String,
        access: ConsoleAccess,
    },
    Help(Option<Verb>),
    Quit,
}

/// A failed command, with enough context for a one-line report.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    pub verb: Verb,
    pub target: Option<String>,
    pub source: Error,
}

impl CommandError {
    pub fn new(cmd: &Command, source: Error) -> Self {
        Self {
            verb: cmd.verb,
            target: cmd.target.clone(),
            source,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.source.is_fatal()
    }

    /// Operator-facing wording for the underlying error, on one line.
    pub fn message(&self) -> String {
        let text = match &self.source {
            Error::NotFound(_) => "no such instance".to_string(),
            Error::Conflict(msg) if msg.is_empty() => "not possible in the instance's current state".to_string(),
            Error::Conflict(msg) => format!("not possible in the instance's current state ({})", msg),
            Error::Remote { status, body } if body.is_empty() => format!("the cloud answered HTTP {}", status),
            Error::Remote { status, body } => format!("the cloud answered HTTP {}: {}", status, body),
            Error::Network(msg) => format!("cloud unreachable: {}", msg),
            Error::InvalidArgument(msg) => msg.clone(),
            Error::Interrupted if self.verb.changes_state() => {
                "interrupted; the request may already have been accepted, check with 'show'".to_string()
            }
            Error::Interrupted => "interrupted".to_string(),
            other => other.to_string(),
        };
        one_line(&text, MAX_ERROR_CHARS)
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "{} {}: {}", self.verb, target, self.message()),
            None => write!(f, "{}: {}", self.verb, self.message()),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Checks a command against its verb's rules without touching the network.
pub fn validate(cmd: &Command) -> Result<(), Error> {
    let spec = cmd.verb.spec();
    match (spec.target, &cmd.target) {
        (TargetRule::Required, None) => {
            return Err(Error::InvalidArgument(format!(
                "{} needs an instance id or name (usage: {})",
                cmd.verb, spec.usage
            )))
        }
        (TargetRule::Required, Some(t)) if t.trim().is_empty() => {
            return Err(Error::InvalidArgument(format!("{} needs a non-empty instance id or name", cmd.verb)))
        }
        (TargetRule::Forbidden, Some(t)) => {
            return Err(Error::InvalidArgument(format!(
                "unexpected argument '{}' (usage: {})",
                t, spec.usage
            )))
        }
        _ => {}
    }

    for (name, value) in &cmd.args {
        let flag = spec.flags.iter().find(|f| f.name == name.as_str()).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown option --{} (usage: {})", name, spec.usage))
        })?;
        if flag.takes_value && value.trim().is_empty() {
            return Err(Error::InvalidArgument(format!("--{} needs a value", name)));
        }
        if !flag.takes_value && !value.is_empty() {
            return Err(Error::InvalidArgument(format!("--{} does not take a value", name)));
        }
    }

    if let Some(raw) = cmd.arg("status") {
        raw.parse::<InstanceStatus>().map_err(Error::InvalidArgument)?;
    }
    if cmd.verb == Verb::Help {
        if let Some(topic) = &cmd.target {
            if Verb::from_name(topic).is_none() {
                return Err(Error::InvalidArgument(format!("no help for '{}'", topic)));
            }
        }
    }
    Ok(())
}

pub struct Dispatcher {
    registry: InstanceRegistry,
}

impl Dispatcher {
    pub fn new(registry: InstanceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, cmd: &Command) -> Result<Output, CommandError> {
        validate(cmd).map_err(|e| CommandError::new(cmd, e))?;
        tracing::debug!(verb = %cmd.verb, target = ?cmd.target, "dispatching");
        self.execute(cmd).await.map_err(|e| {
            tracing::warn!(verb = %cmd.verb, target = ?cmd.target, error = %e, "command failed");
            CommandError::new(cmd, e)
        })
    }

    async fn execute(&self, cmd: &Command) -> Result<Output, Error> {
        let target = cmd.target.clone().unwrap_or_default();
        match cmd.verb {
            Verb::List => {
                let status = cmd
                    .arg("status")
                    .map(|s| s.parse::<InstanceStatus>())
                    .transpose()
                    .map_err(Error::InvalidArgument)?;
                let instances = self
                    .registry
                    .list(ListFilter { status, name: None })
                    .collect()
                    .await?;
                Ok(Output::Instances(instances))
            }
            Verb::Show => Ok(Output::Instance(Box::new(self.registry.find(&target).await?))),
            Verb::Start | Verb::Stop | Verb::Reboot | Verb::Delete => {
                let id = self.registry.resolve(&target).await?;
                match cmd.verb {
                    Verb::Start => self.registry.start(&id).await?,
                    Verb::Stop => self.registry.stop(&id).await?,
                    Verb::Reboot => self.registry.reboot(&id, cmd.flag("hard")).await?,
                    _ => self.registry.delete(&id, cmd.flag("force")).await?,
                }
                Ok(Output::Accepted {
                    verb: cmd.verb,
                    target,
                    id,
                })
            }
            Verb::Console => {
                let id = self.registry.resolve(&target).await?;
                let access = self.registry.console(&id).await?;
                Ok(Output::Console { target, access })
            }
            Verb::Help => Ok(Output::Help(cmd.target.as_deref().and_then(Verb::from_name))),
            Verb::Quit => Ok(Output::Quit),
        }
    }
}
