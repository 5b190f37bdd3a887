use crate::command::ExitCode;
use crate::history::History;
use std::collections::HashMap;
use std::env as stdenv;
use std::fs;
use std::path::{Path, PathBuf};

/// Everything a command can observe or change about the running shell.
///
/// The state contains:
/// - `vars`: a snapshot of the process environment, handed to spawned children.
/// - `current_dir`: the canonical working directory. Only `cd` changes it.
/// - `history`: every line submitted during the session.
/// - `last_status`: exit code of the most recently finished pipeline.
/// - `should_exit`: set by `exit 0`; the REPL stops after the current line.
///
/// The process-wide working directory is never changed; relative paths are
/// resolved against `current_dir` and children are started inside it.
#[derive(Debug, Clone)]
pub struct ShellState {
    pub vars: HashMap<String, String>,
    pub current_dir: PathBuf,
    pub history: History,
    pub last_status: ExitCode,
    pub should_exit: bool,
}

impl ShellState {
    /// Capture the current process environment and working directory.
    pub fn new() -> Self {
        let vars = stdenv::vars().collect();
        let current_dir = stdenv::current_dir()
            .and_then(fs::canonicalize)
            .unwrap_or_else(|_| PathBuf::from("."));
        Self::with_vars(vars, current_dir)
    }

    /// Build a state from explicit parts. Nothing is read from the process.
    pub fn with_vars(vars: HashMap<String, String>, current_dir: PathBuf) -> Self {
        Self {
            vars,
            current_dir,
            history: History::default(),
            last_status: 0,
            should_exit: false,
        }
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Colon-separated executable search path; empty when `PATH` is unset.
    pub fn search_path(&self) -> &str {
        self.get_var("PATH").unwrap_or_default()
    }

    /// `HOME` if set, otherwise whatever the platform reports for the user.
    pub fn home_dir(&self) -> Option<PathBuf> {
        match self.get_var("HOME") {
            Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
            #[allow(deprecated)]
            _ => stdenv::home_dir(),
        }
    }

    /// Anchor `path` at the working directory unless it is already absolute.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.current_dir.join(path)
        }
    }
}

impl Default for ShellState {
    fn default() -> Self {
        Self::new()
    }
}
