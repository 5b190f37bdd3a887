use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Append-only log of submitted command lines.
///
/// Entries are numbered from 1 in submission order and are never removed or
/// renumbered. `persisted` remembers how many of them already reached a history
/// file through `write_to`/`append_to`, so `history -a` only writes new ones.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: Vec<String>,
    persisted: usize,
}

impl History {
    /// Store `line` and return the index it was given.
    pub fn append(&mut self, line: impl Into<String>) -> usize {
        self.entries.push(line.into());
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lines(&self) -> &[String] {
        &self.entries
    }

    /// Entries as `(index, line)`, oldest first.
    ///
    /// `None` or a negative limit selects everything; otherwise only the most
    /// recent `limit` entries are returned.
    pub fn query(&self, limit: Option<i64>) -> impl Iterator<Item = (usize, &str)> {
        let skip = match limit {
            Some(n) if n >= 0 => self.entries.len().saturating_sub(n as usize),
            _ => 0,
        };
        self.entries
            .iter()
            .enumerate()
            .skip(skip)
            .map(|(i, line)| (i + 1, line.as_str()))
    }

    /// `%5d  %s`, the listing format of the `history` builtin.
    pub fn format_entry(index: usize, line: &str) -> String {
        format!("{index:>5}  {line}")
    }

    /// Append every non-empty line of `path` to the history.
    pub fn read_from(&mut self, path: &Path) -> Result<usize> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("can't read history file {}", path.display()))?;
        let before = self.entries.len();
        self.entries.extend(
            text.lines()
                .map(str::trim_end)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        Ok(self.entries.len() - before)
    }

    /// Replace the contents of `path` with the full history.
    pub fn write_to(&mut self, path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)
            .with_context(|| format!("can't create history file {}", path.display()))?;
        for line in &self.entries {
            writeln!(file, "{line}")?;
        }
        self.persisted = self.entries.len();
        Ok(())
    }

    /// Append the entries added since the last write or append to `path`.
    pub fn append_to(&mut self, path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("can't open history file {}", path.display()))?;
        for line in &self.entries[self.persisted.min(self.entries.len())..] {
            writeln!(file, "{line}")?;
        }
        self.persisted = self.entries.len();
        Ok(())
    }

    /// Treat everything currently held as already saved.
    pub fn mark_persisted(&mut self) {
        self.persisted = self.entries.len();
    }
}
