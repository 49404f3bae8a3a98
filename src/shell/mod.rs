//! The interactive loop.
//!
//! The shell is the only part of the tool that talks to the operator. It
//! reads a line, turns it into a [`Command`], asks for confirmation when the
//! verb is destructive, hands it to the [`Dispatcher`] and prints whatever
//! comes back. Recoverable failures are printed and the loop carries on;
//! fatal ones (the session cannot be renewed) end the loop and are returned to
//! the caller, which picks the exit code.

mod editor;
mod history;

pub use editor::{Input, LineSource, RustylineSource, ScriptedSource};
pub use history::{History, DEFAULT_HISTORY_CAPACITY};

use std::future::Future;
use std::io::Write;
use std::time::Duration;

use futures_util::future::BoxFuture;
use indicatif::{ProgressBar, ProgressStyle};

use crate::command::{Command, Verb};
use crate::dispatcher::{self, CommandError, Dispatcher, Output};
use crate::error::Error;
use crate::render;

pub const DEFAULT_PROMPT: &str = "barachiel> ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellState {
    Ready,
    AwaitingInput,
    Dispatching,
    Rendering,
    Terminated,
}

/// Produces a future that resolves when the operator asks to abort a running command.
pub type InterruptSource = Box<dyn Fn() -> BoxFuture<'static, ()>>;

/// Resolves on Ctrl-C. If the handler cannot be installed it never resolves.
pub fn ctrl_c_interrupt() -> BoxFuture<'static, ()> {
    Box::pin(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(%e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
}

pub struct Shell<S: LineSource, W: Write> {
    dispatcher: Dispatcher,
    source: S,
    out: W,
    history: History,
    state: ShellState,
    confirm: bool,
    prompt: String,
    interrupt: InterruptSource,
}

impl<S: LineSource, W: Write> Shell<S, W> {
    pub fn new(dispatcher: Dispatcher, source: S, out: W) -> Self {
        Self {
            dispatcher,
            source,
            out,
            history: History::default(),
            state: ShellState::Ready,
            confirm: true,
            prompt: DEFAULT_PROMPT.to_string(),
            interrupt: Box::new(ctrl_c_interrupt),
        }
    }

    /// Whether stop, reboot and delete ask before they are sent.
    pub fn with_confirmation(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    /// Replaces Ctrl-C as the signal that aborts a running command.
    pub fn with_interrupt<F, Fut>(mut self, interrupt: F) -> Self
    where
        F: Fn() -> Fut + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.interrupt = Box::new(move || Box::pin(interrupt()));
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn state(&self) -> ShellState {
        self.state
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn emit(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = writeln!(self.out, "{}", text) {
            tracing::error!(%e, "failed to write to the terminal");
        }
    }

    fn terminate(&mut self) {
        self.state = ShellState::Terminated;
        self.source.finish();
        let _ = self.out.flush();
    }

    /// Runs until `quit`, end of input, or a fatal error.
    pub async fn run(&mut self) -> Result<(), Error> {
        self.state = ShellState::AwaitingInput;
        loop {
            let prompt = self.prompt.clone();
            let input = match self.source.read_line(&prompt) {
                Ok(input) => input,
                Err(e) => {
                    tracing::error!(%e, "reading input failed");
                    Input::Eof
                }
            };

            let line = match input {
                Input::Eof => {
                    self.terminate();
                    return Ok(());
                }
                Input::Interrupted => continue,
                Input::Line(line) => line,
            };
            if line.trim().is_empty() {
                continue;
            }
            if self.history.push(&line) {
                self.source.remember(line.trim());
            }

            let cmd = match Command::parse(&line) {
                Ok(Some(cmd)) => cmd,
                Ok(None) => continue,
                Err(e) => {
                    self.emit(&render::render_input_error(&e));
                    continue;
                }
            };

            if let Err(e) = dispatcher::validate(&cmd) {
                let err = CommandError::new(&cmd, e);
                self.emit(&render::render_error(&err));
                continue;
            }
            if !self.confirmed(&cmd) {
                self.emit("cancelled");
                continue;
            }

            self.state = ShellState::Dispatching;
            let result = self.dispatch_interruptibly(&cmd).await;

            self.state = ShellState::Rendering;
            match result {
                Ok(Output::Quit) => {
                    self.terminate();
                    return Ok(());
                }
                Ok(output) => {
                    let text = render::render(&output);
                    self.emit(&text);
                }
                Err(err) if err.is_fatal() => {
                    self.emit(&render::render_error(&err));
                    self.terminate();
                    return Err(err.source);
                }
                Err(err) => self.emit(&render::render_error(&err)),
            }
            self.state = ShellState::AwaitingInput;
        }
    }

    fn confirmed(&mut self, cmd: &Command) -> bool {
        if !self.confirm || !cmd.verb.needs_confirmation() || cmd.flag("yes") {
            return true;
        }
        let question = format!(
            "{} {}? [y/N] ",
            cmd.verb,
            cmd.target.as_deref().unwrap_or_default()
        );
        match self.source.read_line(&question) {
            Ok(Input::Line(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }

    /// Races the dispatch against the interrupt source. An interrupted call is dropped;
    /// whatever the cloud already accepted stays accepted.
    async fn dispatch_interruptibly(&self, cmd: &Command) -> Result<Output, CommandError> {
        let spinner = if matches!(cmd.verb, Verb::Help | Verb::Quit) {
            ProgressBar::hidden()
        } else {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner());
            spinner.set_message(format!("{} …", cmd.verb));
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        };

        let interrupted = (self.interrupt)();
        let result = tokio::select! {
            result = self.dispatcher.dispatch(cmd) => result,
            () = interrupted => {
                tracing::info!(verb = %cmd.verb, "interrupted by operator");
                Err(CommandError::new(cmd, Error::Interrupted))
            }
        };
        spinner.finish_and_clear();
        result
    }
}
