/// Operator commands and the table that names them
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Every action the shell understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    List,
    Show,
    Start,
    Stop,
    Reboot,
    Delete,
    Console,
    Help,
    Quit,
}

/// Whether a verb takes an instance id or name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetRule {
    Required,
    Optional,
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagSpec {
    pub name: &'static str,
    pub takes_value: bool,
    pub help: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbSpec {
    pub verb: Verb,
    pub usage: &'static str,
    pub summary: &'static str,
    pub target: TargetRule,
    pub flags: &'static [FlagSpec],
}

const YES_FLAG: FlagSpec = FlagSpec {
    name: "yes",
    takes_value: false,
    help: "skip the confirmation prompt",
};

/// Names accepted on input. The first name listed for a verb is the canonical one.
pub const VERB_NAMES: &[(&str, Verb)] = &[
    ("list", Verb::List),
    ("ls", Verb::List),
    ("show", Verb::Show),
    ("start", Verb::Start),
    ("stop", Verb::Stop),
    ("reboot", Verb::Reboot),
    ("delete", Verb::Delete),
    ("rm", Verb::Delete),
    ("console", Verb::Console),
    ("help", Verb::Help),
    ("?", Verb::Help),
    ("quit", Verb::Quit),
    ("exit", Verb::Quit),
];

const LIST_SPEC: VerbSpec = VerbSpec {
    verb: Verb::List,
    usage: "list [--status S]",
    summary: "list instances, optionally only those in status S",
    target: TargetRule::Forbidden,
    flags: &[FlagSpec {
        name: "status",
        takes_value: true,
        help: "building, active, paused, suspended, stopped, error, deleted or unknown",
    }],
};

const SHOW_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Show,
    usage: "show <id|name>",
    summary: "show details of one instance",
    target: TargetRule::Required,
    flags: &[],
};

const START_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Start,
    usage: "start <id|name>",
    summary: "power on an instance",
    target: TargetRule::Required,
    flags: &[],
};

const STOP_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Stop,
    usage: "stop <id|name> [--yes]",
    summary: "power off an instance",
    target: TargetRule::Required,
    flags: &[YES_FLAG],
};

const REBOOT_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Reboot,
    usage: "reboot <id|name> [--hard] [--yes]",
    summary: "reboot an instance (soft unless --hard)",
    target: TargetRule::Required,
    flags: &[
        FlagSpec {
            name: "hard",
            takes_value: false,
            help: "power-cycle instead of asking the guest to reboot",
        },
        YES_FLAG,
    ],
};

const DELETE_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Delete,
    usage: "delete <id|name> [--force] [--yes]",
    summary: "delete an instance",
    target: TargetRule::Required,
    flags: &[
        FlagSpec {
            name: "force",
            takes_value: false,
            help: "force-delete, skipping soft delete",
        },
        YES_FLAG,
    ],
};

const CONSOLE_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Console,
    usage: "console <id|name>",
    summary: "print a noVNC console URL for an instance",
    target: TargetRule::Required,
    flags: &[],
};

const HELP_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Help,
    usage: "help [command]",
    summary: "show this help, or help for one command",
    target: TargetRule::Optional,
    flags: &[],
};

const QUIT_SPEC: VerbSpec = VerbSpec {
    verb: Verb::Quit,
    usage: "quit",
    summary: "leave the shell",
    target: TargetRule::Forbidden,
    flags: &[],
};

pub const VERB_SPECS: &[VerbSpec] = &[
    LIST_SPEC,
    SHOW_SPEC,
    START_SPEC,
    STOP_SPEC,
    REBOOT_SPEC,
    DELETE_SPEC,
    CONSOLE_SPEC,
    HELP_SPEC,
    QUIT_SPEC,
];

impl Verb {
    pub const ALL: [Verb; 9] = [
        Verb::List,
        Verb::Show,
        Verb::Start,
        Verb::Stop,
        Verb::Reboot,
        Verb::Delete,
        Verb::Console,
        Verb::Help,
        Verb::Quit,
    ];

    pub fn from_name(name: &str) -> Option<Verb> {
        let lower = name.to_ascii_lowercase();
        VERB_NAMES.iter().find(|(n, _)| *n == lower).map(|(_, v)| *v)
    }

    pub fn name(&self) -> &'static str {
        VERB_NAMES
            .iter()
            .find(|(_, v)| v == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    pub fn spec(&self) -> &'static VerbSpec {
        match self {
            Verb::List => &LIST_SPEC,
            Verb::Show => &SHOW_SPEC,
            Verb::Start => &START_SPEC,
            Verb::Stop => &STOP_SPEC,
            Verb::Reboot => &REBOOT_SPEC,
            Verb::Delete => &DELETE_SPEC,
            Verb::Console => &CONSOLE_SPEC,
            Verb::Help => &HELP_SPEC,
            Verb::Quit => &QUIT_SPEC,
        }
    }

    /// Verbs that change remote state. They are never retried automatically.
    pub fn changes_state(&self) -> bool {
        matches!(self, Verb::Start | Verb::Stop | Verb::Reboot | Verb::Delete)
    }

    /// Verbs the shell asks about before sending.
    pub fn needs_confirmation(&self) -> bool {
        matches!(self, Verb::Stop | Verb::Reboot | Verb::Delete)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One parsed operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub verb: Verb,
    pub target: Option<String>,
    /// Flag name to value; switches map to an empty string
    pub args: BTreeMap<String, String>,
}

impl Command {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            target: None,
            args: BTreeMap::new(),
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_flag(self, name: impl Into<String>) -> Self {
        self.with_arg(name, "")
    }

    pub fn flag(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args.get(name).map(|s| s.as_str())
    }

    /// Parses an input line. Blank lines give `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Command>> {
        let words = shell_words::split(line)
            .map_err(|e| Error::InvalidArgument(format!("cannot parse input: {}", e)))?;
        Command::from_words(&words)
    }

    pub fn from_words<S: AsRef<str>>(words: &[S]) -> Result<Option<Command>> {
        let mut iter = words.iter().map(|w| w.as_ref());
        let Some(first) = iter.next() else {
            return Ok(None);
        };
        let verb = Verb::from_name(first).ok_or_else(|| {
            Error::InvalidArgument(format!("unknown command '{}' (type 'help' for a list)", first))
        })?;
        let spec = verb.spec();
        let mut cmd = Command::new(verb);

        while let Some(word) = iter.next() {
            if let Some(long) = word.strip_prefix("--") {
                let (name, inline) = match long.split_once('=') {
                    Some((n, v)) => (n, Some(v.to_string())),
                    None => (long, None),
                };
                let takes_value = spec
                    .flags
                    .iter()
                    .any(|f| f.name == name && f.takes_value);
                let value = match inline {
                    Some(v) => v,
                    None if takes_value => iter
                        .next()
                        .map(|v| v.to_string())
                        .ok_or_else(|| Error::InvalidArgument(format!("--{} needs a value", name)))?,
                    None => String::new(),
                };
                cmd.args.insert(name.to_string(), value);
            } else if word == "-y" {
                cmd.args.insert(YES_FLAG.name.to_string(), String::new());
            } else if cmd.target.is_none() {
                cmd.target = Some(word.to_string());
            } else {
                return Err(Error::InvalidArgument(format!(
                    "unexpected argument '{}' (usage: {})",
                    word, spec.usage
                )));
            }
        }
        Ok(Some(cmd))
    }
}
