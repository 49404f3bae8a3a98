use std::collections::HashMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

// Default configuration constants
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TOKEN_MARGIN_SECS: u64 = 60;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const DEFAULT_BACKOFF_MS: u64 = 500;
pub const DEFAULT_DOMAIN: &str = "Default";
pub const DEFAULT_INTERFACE: &str = "public";
pub const CONFIG_DIR_NAME: &str = "barachiel";
pub const CONFIG_FILE_NAME: &str = "config.toml";

// Environment variable names, the same ones an OpenStack RC file exports
pub const ENV_AUTH_URL: &str = "OS_AUTH_URL";
pub const ENV_PROJECT_NAME: &str = "OS_PROJECT_NAME";
pub const ENV_TENANT_NAME: &str = "OS_TENANT_NAME";
pub const ENV_USERNAME: &str = "OS_USERNAME";
pub const ENV_PASSWORD: &str = "OS_PASSWORD";
pub const ENV_REGION_NAME: &str = "OS_REGION_NAME";
pub const ENV_USER_DOMAIN_NAME: &str = "OS_USER_DOMAIN_NAME";
pub const ENV_PROJECT_DOMAIN_NAME: &str = "OS_PROJECT_DOMAIN_NAME";
pub const ENV_TIMEOUT: &str = "BARACHIEL_TIMEOUT";
pub const ENV_COMPUTE_URL: &str = "BARACHIEL_COMPUTE_URL";

pub fn load_env_file(env_file: Option<&str>) {
    if let Some(path) = env_file {
        dotenvy::from_path(Path::new(path)).ok();
    } else {
        dotenvy::dotenv().ok();
    }
}

/// Identity used to obtain tokens. Built once at startup and never changed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    auth_url: String,
    project: String,
    username: String,
    password: String,
    region: Option<String>,
    user_domain: String,
    project_domain: String,
}

impl Credentials {
    pub fn new(
        auth_url: impl Into<String>,
        project: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            auth_url: sanitize_base_url(&auth_url.into()),
            project: project.into(),
            username: username.into(),
            password: password.into(),
            region: None,
            user_domain: DEFAULT_DOMAIN.to_string(),
            project_domain: DEFAULT_DOMAIN.to_string(),
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    pub fn with_domains(mut self, user_domain: impl Into<String>, project_domain: impl Into<String>) -> Self {
        self.user_domain = user_domain.into();
        self.project_domain = project_domain.into();
        self
    }

    pub fn auth_url(&self) -> &str {
        &self.auth_url
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn user_domain(&self) -> &str {
        &self.user_domain
    }

    pub fn project_domain(&self) -> &str {
        &self.project_domain
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("auth_url", &self.auth_url)
            .field("project", &self.project)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("region", &self.region)
            .field("user_domain", &self.user_domain)
            .field("project_domain", &self.project_domain)
            .finish()
    }
}

/// Runtime knobs that are not part of the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub timeout: Duration,
    pub token_margin: Duration,
    pub page_size: usize,
    pub backoff: Duration,
    pub compute_url: Option<String>,
    pub interface: String,
    pub history_file: Option<PathBuf>,
    pub confirm: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            token_margin: Duration::from_secs(DEFAULT_TOKEN_MARGIN_SECS),
            page_size: DEFAULT_PAGE_SIZE,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            compute_url: None,
            interface: DEFAULT_INTERFACE.to_string(),
            history_file: None,
            confirm: true,
        }
    }
}

/// Values given on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub endpoint: Option<String>,
    pub project: Option<String>,
    pub region: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: Option<u64>,
}

// config like:
// [auth]
// auth_url = "https://keystone.example.com:5000/v3"
// project = "demo"
// username = "demo"
// password = "secret"
// region = "RegionOne"
//
// [shell]
// timeout_secs = 30
// page_size = 100
// history_file = "~/.barachiel_history"
// confirm = true
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub auth: AuthSection,
    pub shell: ShellSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub auth_url: Option<String>,
    pub project: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub region: Option<String>,
    pub user_domain: Option<String>,
    pub project_domain: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub timeout_secs: Option<u64>,
    pub token_margin_secs: Option<u64>,
    pub page_size: Option<usize>,
    pub compute_url: Option<String>,
    pub interface: Option<String>,
    pub history_file: Option<String>,
    pub confirm: Option<bool>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("invalid {}: {}", path.display(), e)))
    }

    /// `$XDG_CONFIG_HOME/barachiel/config.toml` or the platform equivalent.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the explicit file, or the default one when it exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }
}

/// Everything the resolver reads, gathered up front so resolving is pure.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    pub overrides: Overrides,
    pub env: HashMap<String, String>,
    pub file: FileConfig,
}

impl Sources {
    pub fn from_process_env(overrides: Overrides, file: FileConfig) -> Self {
        Self {
            overrides,
            env: env::vars().collect(),
            file,
        }
    }

    fn env(&self, key: &str) -> Option<String> {
        non_blank(self.env.get(key).cloned())
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let t = v.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn first_of(candidates: [Option<String>; 3]) -> Option<String> {
    candidates.into_iter().find_map(non_blank)
}

/// Builds the credentials from flags, then environment, then the config file.
pub fn resolve(sources: &Sources) -> Result<Credentials> {
    let file = &sources.file.auth;
    let overrides = &sources.overrides;

    let auth_url = first_of([overrides.endpoint.clone(), sources.env(ENV_AUTH_URL), file.auth_url.clone()]);
    let project = first_of([
        overrides.project.clone(),
        sources.env(ENV_PROJECT_NAME).or_else(|| sources.env(ENV_TENANT_NAME)),
        file.project.clone(),
    ]);
    let username = first_of([overrides.username.clone(), sources.env(ENV_USERNAME), file.username.clone()]);
    let password = first_of([overrides.password.clone(), sources.env(ENV_PASSWORD), file.password.clone()]);
    let region = first_of([overrides.region.clone(), sources.env(ENV_REGION_NAME), file.region.clone()]);
    let user_domain = first_of([None, sources.env(ENV_USER_DOMAIN_NAME), file.user_domain.clone()])
        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());
    let project_domain = first_of([None, sources.env(ENV_PROJECT_DOMAIN_NAME), file.project_domain.clone()])
        .unwrap_or_else(|| DEFAULT_DOMAIN.to_string());

    let mut missing = Vec::new();
    if auth_url.is_none() {
        missing.push(format!("auth URL (--endpoint or {})", ENV_AUTH_URL));
    }
    if project.is_none() {
        missing.push(format!("project (--project or {})", ENV_PROJECT_NAME));
    }
    if username.is_none() {
        missing.push(format!("username (--username or {})", ENV_USERNAME));
    }
    if password.is_none() {
        missing.push(format!("password ({})", ENV_PASSWORD));
    }

    match (auth_url, project, username, password) {
        (Some(auth_url), Some(project), Some(username), Some(password)) => {
            Ok(Credentials::new(auth_url, project, username, password)
                .with_region(region)
                .with_domains(user_domain, project_domain))
        }
        _ => Err(Error::Configuration(format!("missing {}", missing.join(", ")))),
    }
}

/// True when the password is the only thing keeping `resolve` from succeeding.
pub fn only_password_missing(sources: &Sources) -> bool {
    let mut with_placeholder = sources.clone();
    with_placeholder.overrides.password = Some("-".into());
    resolve(sources).is_err() && resolve(&with_placeholder).is_ok()
}

/// Reads the non-credential settings with the same precedence as `resolve`.
pub fn settings(sources: &Sources) -> Result<Settings> {
    let shell = &sources.file.shell;
    let mut out = Settings::default();

    let timeout_secs = match (sources.overrides.timeout_secs, sources.env(ENV_TIMEOUT)) {
        (Some(secs), _) => Some(secs),
        (None, Some(raw)) => Some(raw.parse::<u64>().map_err(|_| {
            Error::Configuration(format!("{} must be a number of seconds, got '{}'", ENV_TIMEOUT, raw))
        })?),
        (None, None) => shell.timeout_secs,
    };
    if let Some(secs) = timeout_secs {
        if secs == 0 {
            return Err(Error::Configuration("timeout must be greater than zero".into()));
        }
        out.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = shell.token_margin_secs {
        out.token_margin = Duration::from_secs(secs);
    }
    if let Some(size) = shell.page_size {
        if size == 0 {
            return Err(Error::Configuration("page_size must be greater than zero".into()));
        }
        out.page_size = size;
    }
    out.compute_url = first_of([None, sources.env(ENV_COMPUTE_URL), shell.compute_url.clone()])
        .map(|u| sanitize_base_url(&u));
    if let Some(interface) = non_blank(shell.interface.clone()) {
        out.interface = interface;
    }
    out.history_file = non_blank(shell.history_file.clone()).map(|p| expand_home(&p));
    if let Some(confirm) = shell.confirm {
        out.confirm = confirm;
    }
    Ok(out)
}

pub fn sanitize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
