use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// What one read from the operator produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    /// Ctrl-C at the prompt
    Interrupted,
    /// Ctrl-D or closed stdin
    Eof,
}

/// Where the shell gets its lines from.
pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input>;

    /// Offers a line for later recall.
    fn remember(&mut self, _line: &str) {}

    /// Called once when the shell terminates.
    fn finish(&mut self) {}
}

/// Interactive source backed by rustyline, with optional on-disk history.
pub struct RustylineSource {
    editor: DefaultEditor,
    history_file: Option<PathBuf>,
}

impl RustylineSource {
    pub fn new(history_file: Option<PathBuf>) -> io::Result<Self> {
        let mut editor = DefaultEditor::new()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("failed to initialize readline: {}", e)))?;
        if let Some(path) = &history_file {
            if path.exists() {
                if let Err(e) = editor.load_history(path) {
                    tracing::warn!(path = %path.display(), %e, "could not load history");
                }
            }
        }
        Ok(Self { editor, history_file })
    }
}

impl LineSource for RustylineSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Input::Line(line)),
            Err(ReadlineError::Interrupted) => Ok(Input::Interrupted),
            Err(ReadlineError::Eof) => Ok(Input::Eof),
            Err(ReadlineError::Io(e)) => Err(e),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e.to_string())),
        }
    }

    fn remember(&mut self, line: &str) {
        if let Err(e) = self.editor.add_history_entry(line) {
            tracing::debug!(%e, "failed to add history entry");
        }
    }

    fn finish(&mut self) {
        if let Some(path) = &self.history_file {
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = self.editor.save_history(path) {
                tracing::warn!(path = %path.display(), %e, "could not save history");
            }
        }
    }
}

/// Replays a fixed list of lines, then reports end of input.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    lines: VecDeque<Input>,
    prompts: Vec<String>,
}

impl ScriptedSource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(|l| Input::Line(l.into())).collect(),
            prompts: Vec::new(),
        }
    }

    pub fn push(&mut self, input: Input) {
        self.lines.push_back(input);
    }

    /// Prompts shown so far, in order.
    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl LineSource for ScriptedSource {
    fn read_line(&mut self, prompt: &str) -> io::Result<Input> {
        self.prompts.push(prompt.to_string());
        Ok(self.lines.pop_front().unwrap_or(Input::Eof))
    }
}
