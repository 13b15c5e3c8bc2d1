//! The error taxonomy used throughout the crate.
//!
//! Every stage collects its per-item errors into a list and raises a single
//! [`AggregatedError`] at its boundary rather than bailing out on the first
//! failure (see spec §7).

use std::{
    fmt,
    path::{Path, PathBuf},
};

/// A single failure produced while running the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid [`crate::config::Config`] — missing root symbol, bad workspace layout. Fatal
    /// before any work starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A single file failed to parse. Non-fatal for other files in the same stage.
    #[error("failed to analyse {path}: {message}")]
    Analysis { path: PathBuf, message: String },

    /// A `symbol_dep` has no known definer. Always a warning unless explicitly promoted.
    #[error("unresolved symbol `{symbol}` required by {referenced_from}")]
    UnresolvedSymbol { symbol: String, referenced_from: PathBuf },

    /// The compiler exited with a non-zero status for a given source file.
    #[error("compile of {path} failed:\n{stderr}")]
    Compile { path: PathBuf, stderr: String },

    /// A tool requested from the [`crate::tools::ToolBox`] is not available on this machine.
    #[error("tool `{0}` is not available")]
    ToolUnavailable(String),

    /// A cache record was present but unreadable or incomplete. Never fatal: treated as a miss.
    #[error("cache corruption at {0}")]
    CacheCorruption(PathBuf),

    /// Wraps an IO failure together with the path that caused it.
    #[error("IO error at {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    Message(String),
}

impl Error {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io { path: path.into(), source }
    }

    pub fn msg(msg: impl fmt::Display) -> Self {
        Error::Message(msg.to_string())
    }

    pub fn analysis(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Error::Analysis { path: path.into(), message: message.to_string() }
    }

    pub fn unresolved_symbol(symbol: impl Into<String>, referenced_from: impl Into<PathBuf>) -> Self {
        Error::UnresolvedSymbol { symbol: symbol.into(), referenced_from: referenced_from.into() }
    }

    pub fn compile(path: impl Into<PathBuf>, stderr: impl Into<String>) -> Self {
        Error::Compile { path: path.into(), stderr: stderr.into() }
    }

    /// Builds a [`Error::Compile`] from a finished child process, preserving embedded newlines in
    /// the captured stderr.
    pub fn from_compile_output(path: impl Into<PathBuf>, output: &std::process::Output) -> Self {
        let mut msg = String::from_utf8_lossy(&output.stderr).into_owned();
        if msg.trim().is_empty() {
            msg = String::from_utf8_lossy(&output.stdout).into_owned();
        }
        if msg.trim().is_empty() {
            msg = "<empty output>".to_string();
        }
        Error::compile(path, msg)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A list of per-item errors raised at a stage boundary (spec §7).
///
/// Unlike [`Error`] this is never returned from a single operation; it is built up by a stage
/// that keeps going after individual failures and is only raised once the stage has finished
/// processing every item.
#[derive(Debug, Default)]
pub struct AggregatedError {
    pub errors: Vec<Error>,
}

impl AggregatedError {
    pub fn new(errors: Vec<Error>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Returns `Ok(())` if no errors were collected, otherwise `Err(self)`.
    pub fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for AggregatedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} error(s) occurred:", self.errors.len())?;
        for e in &self.errors {
            writeln!(f, "  - {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregatedError {}

/// A warning that never aborts the pipeline on its own, but is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Warning {
    UnresolvedSymbol { symbol: String, referenced_from: PathBuf },
    DuplicateSymbol { symbol: String, kept: PathBuf, discarded: PathBuf },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::UnresolvedSymbol { symbol, referenced_from } => {
                write!(f, "unresolved symbol `{symbol}` required by {}", referenced_from.display())
            }
            Warning::DuplicateSymbol { symbol, kept, discarded } => write!(
                f,
                "duplicate symbol `{symbol}` defined in both {} and {}; keeping {}",
                kept.display(),
                discarded.display(),
                kept.display()
            ),
        }
    }
}

pub(crate) fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| Error::io(e, path))?;
    serde_json::from_str(&content).map_err(Error::from)
}
