use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Executable lookup over a colon-separated search path.
///
/// An empty segment stands for the working directory, as do relative
/// segments anchored there. The working directory is passed in rather than
/// read from the process so the shell's own notion of it is used.
pub struct PathResolver<'a> {
    search_path: &'a str,
    cwd: &'a Path,
}

impl<'a> PathResolver<'a> {
    pub fn new(search_path: &'a str, cwd: &'a Path) -> Self {
        Self { search_path, cwd }
    }

    fn dirs(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.search_path
            .split(':')
            .filter(move |_| !self.search_path.is_empty())
            .map(move |segment| {
                if segment.is_empty() {
                    self.cwd.to_path_buf()
                } else {
                    self.cwd.join(segment)
                }
            })
    }

    /// Resolve a command name the way a typical shell would.
    ///
    /// Behavior:
    /// - Empty name: `None`.
    /// - Name containing `/` (e.g. `./run.sh`, `/bin/ls`): checked directly,
    ///   relative to the working directory.
    /// - Otherwise: the first directory in the search path holding an
    ///   executable regular file of that name wins.
    pub fn find_executable(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.contains('/') {
            let path = self.cwd.join(name);
            return is_executable(&path).then_some(path);
        }
        self.dirs()
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    /// Names of every executable starting with `prefix`, de-duplicated across
    /// directories in first-seen order.
    pub fn executables_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for dir in self.dirs() {
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            let mut matches: Vec<String> = entries
                .filter_map(|entry| entry.ok())
                .filter_map(|entry| {
                    let name = entry.file_name().into_string().ok()?;
                    (name.starts_with(prefix) && is_executable(&entry.path())).then_some(name)
                })
                .collect();
            // Directory order is arbitrary; keep a stable order within one dir.
            matches.sort();
            for name in matches {
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }
}

/// Regular file (after following symlinks) with any execute bit set.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(false)
}
