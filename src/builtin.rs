use crate::command::{CommandFactory, ExecutableCommand, ExitCode};
use crate::history;
use crate::resolver::PathResolver;
use crate::state::ShellState;
use anyhow::{Context, Result};
use argh::{EarlyExit, FromArgs};
use std::fs;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

/// Names of every builtin, in the order they are offered for completion.
pub const BUILTIN_NAMES: [&str; 6] = ["cd", "echo", "exit", "history", "pwd", "type"];

pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// Built-in commands known to the shell at compile time.
///
/// Builtins are parsed using the [`argh`] crate (`FromArgs`) and executed directly
/// in-process without spawning a child process.
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "echo" or "cd".
    fn name() -> &'static str;

    /// Executes the command using provided IO streams and shell state.
    ///
    /// Return value should follow shell conventions: 0 for success, non-zero for error.
    fn execute(
        self,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode>;
}

impl<T: BuiltinCommand> ExecutableCommand for T {
    fn execute(
        self: Box<Self>,
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        match T::execute(*self, stdin, stdout, state) {
            Ok(x) => Ok(x),
            Err(e) => {
                writeln!(stdout, "{}: {e:#}", T::name())?;
                Ok(1)
            }
        }
    }
}

struct InvalidArgs {
    output: String,
    is_error: bool,
}

impl ExecutableCommand for InvalidArgs {
    fn execute(
        self: Box<Self>,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        stdout.write_all(self.output.as_bytes())?;
        if !self.output.ends_with('\n') {
            stdout.write_all(b"\n")?;
        }
        Ok(if self.is_error { 1 } else { 0 })
    }
}

/// Creates instances of one builtin type.
pub(crate) struct Factory<T> {
    _phantom: PhantomData<T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand + 'static> CommandFactory for Factory<T> {
    fn name(&self) -> &'static str {
        T::name()
    }

    fn try_create(&self, name: &str, args: &[&str]) -> Option<Box<dyn ExecutableCommand>> {
        if name == T::name() {
            Some(match T::from_args(&[name], args) {
                Ok(cmd) => Box::new(cmd),
                Err(EarlyExit { output, status }) => Box::new(InvalidArgs {
                    output,
                    is_error: status.is_err(),
                }),
            })
        } else {
            None
        }
    }
}

/// One factory per builtin listed in [`BUILTIN_NAMES`].
pub fn default_factories() -> Vec<Box<dyn CommandFactory>> {
    vec![
        Box::new(Factory::<Cd>::default()),
        Box::new(Factory::<Echo>::default()),
        Box::new(Factory::<Exit>::default()),
        Box::new(Factory::<History>::default()),
        Box::new(Factory::<Pwd>::default()),
        Box::new(Factory::<Type>::default()),
    ]
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {
    #[argh(positional, greedy)]
    /// operands are accepted and ignored.
    pub ignored: Vec<String>,
}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", state.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// Without a target nothing happens. A leading `~` stands for the home directory.
/// Only the first operand is used.
pub struct Cd {
    #[argh(positional, greedy)]
    /// directory to switch to; absolute or relative to the current directory.
    pub targets: Vec<String>,
}

impl Cd {
    fn expand_home(target: &str, state: &ShellState) -> PathBuf {
        let rest = match target.strip_prefix('~') {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
            _ => return PathBuf::from(target),
        };
        match state.home_dir() {
            Some(home) => home.join(rest.trim_start_matches('/')),
            None => PathBuf::from(target),
        }
    }
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        let Some(target) = self.targets.into_iter().next() else {
            return Ok(0);
        };
        let new_dir = state.resolve_path(Self::expand_home(&target, state));
        match fs::canonicalize(&new_dir) {
            Ok(canonical) if canonical.is_dir() => {
                log::debug!("cd: {} -> {}", state.current_dir.display(), canonical.display());
                state.current_dir = canonical;
                Ok(0)
            }
            _ => {
                writeln!(stdout, "cd: {target}: No such file or directory")?;
                Ok(1)
            }
        }
    }
}

#[derive(FromArgs)]
/// Exit the shell. Only `exit 0` is acted upon; other forms are accepted and ignored.
pub struct Exit {
    #[argh(positional, greedy)]
    /// requested exit status.
    pub args: Vec<String>,
}

impl BuiltinCommand for Exit {
    fn name() -> &'static str {
        "exit"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        _stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        if self.args == ["0"] {
            state.should_exit = true;
        } else {
            log::debug!("exit {:?} ignored", self.args);
        }
        Ok(0)
    }
}

/// Write the arguments to standard output, separated by spaces, then a newline.
///
/// Every argument is printed as-is, including ones that look like flags, so
/// argument parsing is done by hand instead of derived.
pub struct Echo {
    pub args: Vec<String>,
}

impl FromArgs for Echo {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        Ok(Self {
            args: args.iter().map(|s| s.to_string()).collect(),
        })
    }
}

impl BuiltinCommand for Echo {
    fn name() -> &'static str {
        "echo"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        _state: &mut ShellState,
    ) -> Result<ExitCode> {
        writeln!(stdout, "{}", self.args.join(" "))?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Describe how each name would be interpreted as a command.
pub struct Type {
    #[argh(positional, greedy)]
    /// command names to look up.
    pub names: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        if self.names.is_empty() {
            writeln!(stdout, "type: missing operand")?;
            return Ok(1);
        }
        let resolver = PathResolver::new(state.search_path(), &state.current_dir);
        let mut code = 0;
        for name in &self.names {
            if is_builtin(name) {
                writeln!(stdout, "{name} is a shell builtin")?;
            } else if let Some(path) = resolver.find_executable(name) {
                writeln!(stdout, "{name} is {}", path.display())?;
            } else {
                writeln!(stdout, "{name}: not found")?;
                code = 1;
            }
        }
        Ok(code)
    }
}

/// Show or persist the command history.
///
/// `history [n]` lists entries; `-r`, `-w` and `-a` read, write or append a
/// history file, defaulting to `HISTFILE`.
pub enum History {
    List(Option<i64>),
    Read(Option<String>),
    Write(Option<String>),
    Append(Option<String>),
}

const HISTORY_USAGE: &str = "history: usage: history [n] | history -r|-w|-a [file]";

impl FromArgs for History {
    fn from_args(_command_name: &[&str], args: &[&str]) -> Result<Self, EarlyExit> {
        let file = |rest: &[&str]| rest.first().map(|s| s.to_string());
        let usage = |output: String| EarlyExit {
            output,
            status: Err(()),
        };
        match args {
            [] => Ok(History::List(None)),
            ["-r", rest @ ..] if rest.len() <= 1 => Ok(History::Read(file(rest))),
            ["-w", rest @ ..] if rest.len() <= 1 => Ok(History::Write(file(rest))),
            ["-a", rest @ ..] if rest.len() <= 1 => Ok(History::Append(file(rest))),
            [limit] => match limit.parse::<i64>() {
                Ok(n) => Ok(History::List(Some(n))),
                Err(_) => Err(usage(format!("history: {limit}: numeric argument required"))),
            },
            _ => Err(usage(HISTORY_USAGE.to_string())),
        }
    }
}

impl History {
    fn file(arg: Option<String>, state: &ShellState) -> Result<PathBuf> {
        let name = arg
            .or_else(|| state.get_var("HISTFILE").map(str::to_string))
            .context("no history file given and HISTFILE is not set")?;
        Ok(state.resolve_path(name))
    }
}

impl BuiltinCommand for History {
    fn name() -> &'static str {
        "history"
    }

    fn execute(
        self,
        _stdin: &mut dyn Read,
        stdout: &mut dyn Write,
        state: &mut ShellState,
    ) -> Result<ExitCode> {
        match self {
            History::List(limit) => {
                for (index, line) in state.history.query(limit) {
                    writeln!(stdout, "{}", history::History::format_entry(index, line))?;
                }
            }
            History::Read(file) => {
                let path = Self::file(file, state)?;
                state.history.read_from(&path)?;
            }
            History::Write(file) => {
                let path = Self::file(file, state)?;
                state.history.write_to(&path)?;
            }
            History::Append(file) => {
                let path = Self::file(file, state)?;
                state.history.append_to(&path)?;
            }
        }
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::tests::make_executable;
    use std::collections::HashMap;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn state_in(dir: &std::path::Path) -> ShellState {
        ShellState::with_vars(HashMap::new(), fs::canonicalize(dir).unwrap())
    }

    fn run<T: BuiltinCommand>(cmd: T, state: &mut ShellState) -> (ExitCode, String) {
        let mut out = Vec::new();
        let code = cmd
            .execute(&mut Cursor::new(Vec::new()), &mut out, state)
            .unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    fn cd(target: Option<String>) -> Cd {
        Cd {
            targets: target.into_iter().collect(),
        }
    }

    fn run_line(name: &str, args: &[&str], state: &mut ShellState) -> (ExitCode, String) {
        let cmd = default_factories()
            .iter()
            .find_map(|f| f.try_create(name, args))
            .expect("builtin exists");
        let mut out = Vec::new();
        let code = cmd
            .execute(&mut Cursor::new(Vec::new()), &mut out, state)
            .unwrap();
        (code, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_factories_match_builtin_names() {
        let names: Vec<_> = default_factories().iter().map(|f| f.name()).collect();
        assert_eq!(names, BUILTIN_NAMES);
    }

    #[test]
    fn test_pwd_prints_current_dir() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let (code, out) = run(Pwd { ignored: Vec::new() }, &mut state);
        assert_eq!(code, 0);
        assert_eq!(out, format!("{}\n", state.current_dir.display()));
    }

    #[test]
    fn test_pwd_ignores_operands() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let (code, out) = run_line("pwd", &["extra", "-x"], &mut state);
        assert_eq!(code, 0);
        assert_eq!(out, format!("{}\n", state.current_dir.display()));
    }

    #[test]
    fn test_cd_uses_first_operand() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        let mut state = state_in(dir.path());
        let root = state.current_dir.clone();
        let (code, out) = run_line("cd", &["a", "b"], &mut state);
        assert_eq!((code, out.as_str()), (0, ""));
        assert_eq!(state.current_dir, root.join("a"));
    }

    #[test]
    fn test_echo_joins_args() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let (_, out) = run_line("echo", &["a  b", "c d", "-n"], &mut state);
        assert_eq!(out, "a  b c d -n\n");
        let (_, out) = run_line("echo", &[], &mut state);
        assert_eq!(out, "\n");
    }

    #[test]
    fn test_cd_absolute_and_relative() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        let mut state = state_in(dir.path());
        let root = state.current_dir.clone();

        let (code, _) = run(cd(Some("a/b".into())), &mut state);
        assert_eq!(code, 0);
        assert_eq!(state.current_dir, root.join("a/b"));

        run(cd(Some("../..".into())), &mut state);
        assert_eq!(state.current_dir, root);

        let target = root.join("a").display().to_string();
        run(cd(Some(target)), &mut state);
        assert_eq!(state.current_dir, root.join("a"));
    }

    #[test]
    fn test_cd_without_target_does_nothing() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let before = state.current_dir.clone();
        let (code, out) = run(cd(None), &mut state);
        assert_eq!((code, out.as_str()), (0, ""));
        assert_eq!(state.current_dir, before);
    }

    #[test]
    fn test_cd_home_expansion() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        let mut state = state_in(dir.path());
        let home = state.current_dir.clone();
        state.set_var("HOME", home.display().to_string());
        run(cd(Some("docs".into())), &mut state);

        run(cd(Some("~".into())), &mut state);
        assert_eq!(state.current_dir, home);
        run(cd(Some("~/docs".into())), &mut state);
        assert_eq!(state.current_dir, home.join("docs"));
    }

    #[test]
    fn test_cd_nonexistent_keeps_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("file"), "x").unwrap();
        let mut state = state_in(dir.path());
        let before = state.current_dir.clone();

        let (code, out) = run(cd(Some("/nonexistent".into())), &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, "cd: /nonexistent: No such file or directory\n");

        let (_, out) = run(cd(Some("file".into())), &mut state);
        assert_eq!(out, "cd: file: No such file or directory\n");
        assert_eq!(state.current_dir, before);
    }

    #[test]
    fn test_type_reports_builtin_path_and_missing() {
        let bin = TempDir::new().unwrap();
        let tool = make_executable(bin.path(), "my_tool", "true");
        let mut state = state_in(bin.path());
        state.set_var("PATH", bin.path().display().to_string());

        let (_, out) = run_line("type", &["echo"], &mut state);
        assert_eq!(out, "echo is a shell builtin\n");
        let (_, out) = run_line("type", &["my_tool"], &mut state);
        assert_eq!(out, format!("my_tool is {}\n", tool.display()));
        let (code, out) = run_line("type", &["nonexistent_cmd_xyz"], &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, "nonexistent_cmd_xyz: not found\n");
    }

    #[test]
    fn test_type_missing_operand() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let (code, out) = run_line("type", &[], &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, "type: missing operand\n");
    }

    #[test]
    fn test_exit_only_acts_on_zero() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        for args in [&[][..], &["1"][..], &["0", "1"][..], &["abc"][..]] {
            run_line("exit", args, &mut state);
            assert!(!state.should_exit, "exit {args:?} must be ignored");
        }
        run_line("exit", &["0"], &mut state);
        assert!(state.should_exit);
    }

    #[test]
    fn test_history_listing_and_limit() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        for line in ["echo a", "pwd", "history"] {
            state.history.append(line);
        }
        let (_, out) = run_line("history", &[], &mut state);
        assert_eq!(out, "    1  echo a\n    2  pwd\n    3  history\n");
        let (_, out) = run_line("history", &["2"], &mut state);
        assert_eq!(out, "    2  pwd\n    3  history\n");
        let (_, out) = run_line("history", &["-1"], &mut state);
        assert_eq!(out.lines().count(), 3);
    }

    #[test]
    fn test_history_rejects_non_numeric_limit() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        let (code, out) = run_line("history", &["abc"], &mut state);
        assert_eq!(code, 1);
        assert_eq!(out, "history: abc: numeric argument required\n");
    }

    #[test]
    fn test_history_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        state.history.append("echo one");
        state.history.append("history -w saved");
        run_line("history", &["-w", "saved"], &mut state);
        assert_eq!(
            fs::read_to_string(dir.path().join("saved")).unwrap(),
            "echo one\nhistory -w saved\n"
        );

        let mut fresh = state_in(dir.path());
        run_line("history", &["-r", "saved"], &mut fresh);
        assert_eq!(fresh.history.lines(), ["echo one", "history -w saved"]);
    }

    #[test]
    fn test_history_file_defaults_to_histfile() {
        let dir = TempDir::new().unwrap();
        let mut state = state_in(dir.path());
        state.history.append("pwd");
        let (code, out) = run_line("history", &["-a"], &mut state);
        assert_eq!(code, 1);
        assert!(out.starts_with("history: no history file given"), "{out}");

        state.set_var("HISTFILE", dir.path().join("h").display().to_string());
        let (code, _) = run_line("history", &["-a"], &mut state);
        assert_eq!(code, 0);
        assert_eq!(fs::read_to_string(dir.path().join("h")).unwrap(), "pwd\n");
    }
}
