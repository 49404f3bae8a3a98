use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};
use yansi::Paint;

use barachiel::api::{self, InstanceRegistry, SessionManager};
use barachiel::command::Command;
use barachiel::config::{self, FileConfig, Overrides, Sources};
use barachiel::dispatcher::{self, CommandError, Dispatcher, Output};
use barachiel::render;
use barachiel::shell::{RustylineSource, Shell};
use barachiel::{EXIT_OK, EXIT_SESSION, EXIT_STARTUP};

#[derive(Parser)]
#[command(
    name = "barachiel",
    author,
    version,
    about = "Manage virtual machines in OpenStack from a terminal",
    long_about = r#"barachiel opens an interactive shell against the compute service of an OpenStack cloud.

Credentials come from the command line, then the usual OpenStack RC variables
(OS_AUTH_URL, OS_PROJECT_NAME, OS_USERNAME, OS_PASSWORD, OS_REGION_NAME,
OS_USER_DOMAIN_NAME, OS_PROJECT_DOMAIN_NAME), then the [auth] section of
~/.config/barachiel/config.toml. A .env file in the working directory is loaded first.

Examples:
  1) Interactive shell:
      barachiel --endpoint https://keystone.example.com:5000/v3 --project demo
  2) One command, then exit:
      barachiel list --status active
      barachiel reboot web-1 --hard
"#,
    after_help = "Inside the shell, type `help` for the list of commands."
)]
struct Cli {
    /// Identity (Keystone) endpoint URL
    #[arg(long)]
    endpoint: Option<String>,
    /// Project name
    #[arg(long)]
    project: Option<String>,
    /// Region name
    #[arg(long)]
    region: Option<String>,
    /// User name
    #[arg(long)]
    username: Option<String>,
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to a .env file
    #[arg(long)]
    env_file: Option<String>,
    /// Timeout for every remote call, in seconds
    #[arg(long)]
    timeout: Option<u64>,
    /// Print each request as a curl command (secrets masked)
    #[arg(long)]
    trace: bool,
    /// Disable colorized output
    #[arg(long)]
    no_color: bool,
    /// Run a single command instead of the shell, e.g. `list --status active`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn fail(code: i32, msg: impl std::fmt::Display) -> ! {
    eprintln!("{}", Paint::new(msg.to_string()).red());
    process::exit(code);
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    if cli.no_color {
        yansi::whenever(yansi::Condition::NEVER);
    }
    api::set_trace(cli.trace);

    config::load_env_file(cli.env_file.as_deref());
    let file = FileConfig::discover(cli.config.as_deref()).unwrap_or_else(|e| fail(EXIT_STARTUP, e));

    let overrides = Overrides {
        endpoint: cli.endpoint.clone(),
        project: cli.project.clone(),
        region: cli.region.clone(),
        username: cli.username.clone(),
        password: None,
        timeout_secs: cli.timeout,
    };
    let mut sources = Sources::from_process_env(overrides, file);

    if config::only_password_missing(&sources) && io::stdin().is_terminal() {
        match rpassword::prompt_password("Password: ") {
            Ok(password) => sources.overrides.password = Some(password),
            Err(e) => fail(EXIT_STARTUP, format!("failed to read password: {}", e)),
        }
    }

    let credentials = config::resolve(&sources).unwrap_or_else(|e| fail(EXIT_STARTUP, e));
    let settings = config::settings(&sources).unwrap_or_else(|e| fail(EXIT_STARTUP, e));
    tracing::debug!(?credentials, ?settings, "configuration resolved");

    let client = api::build_http_client(settings.timeout).unwrap_or_else(|e| fail(EXIT_STARTUP, e));
    let session = Arc::new(SessionManager::new(client, credentials, &settings));
    let current = session.authenticate().await.unwrap_or_else(|e| fail(EXIT_STARTUP, e));

    let registry = InstanceRegistry::new(Arc::clone(&session), settings.page_size);
    let dispatcher = Dispatcher::new(registry);

    if !cli.command.is_empty() {
        process::exit(run_once(&dispatcher, &cli.command).await);
    }

    let creds = session.credentials();
    println!(
        "{} {}@{} {} {}",
        Paint::new("Connected as").green(),
        Paint::new(creds.username()).bold(),
        Paint::new(creds.project()).bold(),
        Paint::new("on").green(),
        Paint::new(current.compute_url()).cyan()
    );
    println!("{}", Paint::new("Type 'help' for commands, 'quit' to leave.").dim());

    let source = RustylineSource::new(settings.history_file.clone()).unwrap_or_else(|e| fail(EXIT_STARTUP, e));
    let mut shell = Shell::new(dispatcher, source, io::stdout()).with_confirmation(settings.confirm);
    match shell.run().await {
        Ok(()) => process::exit(EXIT_OK),
        Err(e) => {
            tracing::error!(error = %e, "session lost");
            process::exit(EXIT_SESSION);
        }
    }
}

/// Non-interactive mode. The command line itself is the confirmation.
async fn run_once(dispatcher: &Dispatcher, words: &[String]) -> i32 {
    let cmd = match Command::from_words(words) {
        Ok(Some(cmd)) => cmd,
        Ok(None) => return EXIT_OK,
        Err(e) => {
            eprintln!("{}", render::render_input_error(&e));
            return EXIT_STARTUP;
        }
    };
    if let Err(e) = dispatcher::validate(&cmd) {
        eprintln!("{}", render::render_error(&CommandError::new(&cmd, e)));
        return EXIT_STARTUP;
    }
    match dispatcher.dispatch(&cmd).await {
        Ok(Output::Quit) => EXIT_OK,
        Ok(output) => {
            println!("{}", render::render(&output));
            EXIT_OK
        }
        Err(err) => {
            eprintln!("{}", render::render_error(&err));
            if err.is_fatal() {
                EXIT_SESSION
            } else {
                EXIT_STARTUP
            }
        }
    }
}
