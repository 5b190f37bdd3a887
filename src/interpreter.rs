use crate::builtin::{self, BUILTIN_NAMES};
use crate::command::{CommandFactory, ExitCode};
use crate::editor::{Candidates, Completer, InputMode, LineEditor};
use crate::lexer;
use crate::parser::{self, Pipeline, RedirectMode, RedirectTarget, Redirections};
use crate::resolver::PathResolver;
use crate::state::ShellState;
use crate::terminal::{FdReader, RawModeGuard, TerminalMode};
use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{self, Cursor, Read, Write};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;

pub const PROMPT: &str = "$ ";

/// Exit status recorded for a command that could not be found or started.
const NOT_FOUND: ExitCode = 127;

/// An executable found on disk, with the name it was invoked by.
#[derive(Debug, Clone, PartialEq, Eq)]
struct External {
    name: String,
    path: PathBuf,
    args: Vec<String>,
}

/// A pipeline stage after command lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Stage {
    Builtin { name: String, args: Vec<String> },
    External(External),
}

/// Destination of one output stream of a stage.
enum Sink {
    Inherit,
    File(File),
    /// The redirection target could not be opened; output is dropped.
    Discard,
}

impl Sink {
    fn open(target: Option<&RedirectTarget>) -> Self {
        let Some(target) = target else {
            return Sink::Inherit;
        };
        let append = target.mode == RedirectMode::Append;
        let opened = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&target.path);
        match opened {
            Ok(file) => Sink::File(file),
            Err(err) => {
                log::debug!("can't open {}: {err}", target.path.display());
                Sink::Discard
            }
        }
    }

    fn stdio(self) -> Stdio {
        match self {
            Sink::Inherit => Stdio::inherit(),
            Sink::File(file) => file.into(),
            Sink::Discard => Stdio::null(),
        }
    }
}

/// Completion over builtin names and executables on the search path.
pub struct ShellCompleter<'a> {
    state: &'a ShellState,
}

impl<'a> ShellCompleter<'a> {
    pub fn new(state: &'a ShellState) -> Self {
        Self { state }
    }
}

impl Completer for ShellCompleter<'_> {
    fn candidates(&self, prefix: &str) -> Candidates {
        let resolver = PathResolver::new(self.state.search_path(), &self.state.current_dir);
        Candidates {
            builtins: BUILTIN_NAMES
                .iter()
                .filter(|name| name.starts_with(prefix))
                .map(|name| name.to_string())
                .collect(),
            executables: resolver.executables_with_prefix(prefix),
        }
    }
}

/// The shell: parses command lines and runs them against its [`ShellState`].
///
/// Example
/// ```
/// use crabsh::{Interpreter, ShellState};
/// let mut sh = Interpreter::new(ShellState::new());
/// let mut out = Vec::new();
/// let code = sh.run_line("echo hello world", &mut out, &mut std::io::sink()).unwrap();
/// assert_eq!(code, 0);
/// assert_eq!(out, b"hello world\n");
/// ```
pub struct Interpreter {
    state: ShellState,
    commands: Vec<Box<dyn CommandFactory>>,
}

impl Interpreter {
    /// Create an interpreter with the default set of builtins.
    pub fn new(state: ShellState) -> Self {
        Self {
            state,
            commands: builtin::default_factories(),
        }
    }

    pub fn state(&self) -> &ShellState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ShellState {
        &mut self.state
    }

    /// Load a history file, treating its entries as already saved.
    pub fn load_history(&mut self, path: &Path) -> Result<usize> {
        let loaded = self.state.history.read_from(path)?;
        self.state.history.mark_persisted();
        Ok(loaded)
    }

    /// Interactive loop over the process's own stdin and stdout.
    ///
    /// `terminal` is only switched to raw mode while a line is being read,
    /// so commands run with the user's terminal settings.
    pub fn repl(&mut self, mode: InputMode, terminal: &mut dyn TerminalMode) -> Result<()> {
        let mut editor = LineEditor::new(PROMPT, mode);
        self.run_session(
            &mut editor,
            terminal,
            &mut FdReader::stdin(),
            &mut io::stdout(),
            &mut io::stderr(),
        )
    }

    /// Read, run and record lines until end of input or `exit 0`.
    pub fn run_session(
        &mut self,
        editor: &mut LineEditor,
        terminal: &mut dyn TerminalMode,
        input: &mut dyn Read,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<()> {
        while !self.state.should_exit {
            let Some(line) = self
                .read_line(editor, terminal, input, stdout)
                .context("failed to read input")?
            else {
                break;
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            self.state.history.append(line);
            if let Err(err) = self.run_line(line, stdout, stderr) {
                writeln!(stderr, "{err:#}")?;
            }
        }
        Ok(())
    }

    fn read_line(
        &self,
        editor: &mut LineEditor,
        terminal: &mut dyn TerminalMode,
        input: &mut dyn Read,
        out: &mut dyn Write,
    ) -> io::Result<Option<String>> {
        let completer = ShellCompleter::new(&self.state);
        let history = self.state.history.lines();
        if editor.mode() != InputMode::Raw {
            return editor.read_line(input, &completer, history, out);
        }
        match RawModeGuard::enter(terminal) {
            Ok(_guard) => editor.read_line(input, &completer, history, out),
            Err(err) => {
                log::warn!("terminal refused raw mode ({err}), completing on space instead");
                *editor = LineEditor::new(PROMPT, InputMode::SpaceTrigger);
                editor.read_line(input, &completer, history, out)
            }
        }
    }

    /// Tokenize, parse and run one command line.
    ///
    /// Builtin output and shell messages go to `stdout`/`stderr` unless
    /// redirected; external commands inherit the process's own descriptors.
    pub fn run_line(
        &mut self,
        line: &str,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let tokens = lexer::tokenize(line);
        match parser::parse_pipeline(tokens, &self.state.current_dir) {
            Some(pipeline) => self.run_pipeline(&pipeline, stdout, stderr),
            None => Ok(self.state.last_status),
        }
    }

    /// Run every stage of `pipeline` and return the exit code of the last one.
    ///
    /// Only the last stage's stdout redirection receives output. Earlier stages
    /// feed the next stage; their stdout targets are still created.
    pub fn run_pipeline(
        &mut self,
        pipeline: &Pipeline,
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        log::debug!("running {pipeline:?}");
        let mut stages = Vec::with_capacity(pipeline.stages.len());
        for stage in &pipeline.stages {
            match self.resolve(&stage.argv) {
                Some(resolved) => stages.push(resolved),
                None => {
                    report_not_found(stage.name(), &stage.redirects, stderr)?;
                    self.state.last_status = NOT_FOUND;
                    return Ok(NOT_FOUND);
                }
            }
        }
        for stage in &pipeline.stages[..pipeline.stages.len() - 1] {
            drop(Sink::open(stage.redirects.stdout.as_ref()));
        }

        let redirects: Vec<&Redirections> = pipeline.stages.iter().map(|s| &s.redirects).collect();
        let code = if stages.iter().all(|stage| matches!(stage, Stage::External(_))) {
            let externals: Vec<External> = stages
                .into_iter()
                .filter_map(|stage| match stage {
                    Stage::External(external) => Some(external),
                    Stage::Builtin { .. } => None,
                })
                .collect();
            self.run_external_pipeline(&externals, &redirects, stdout, stderr)?
        } else {
            self.run_buffered_pipeline(stages, &redirects, stdout, stderr)?
        };
        self.state.last_status = code;
        Ok(code)
    }

    fn resolve(&self, argv: &[String]) -> Option<Stage> {
        let (name, args) = argv.split_first()?;
        if builtin::is_builtin(name) {
            return Some(Stage::Builtin {
                name: name.clone(),
                args: args.to_vec(),
            });
        }
        let resolver = PathResolver::new(self.state.search_path(), &self.state.current_dir);
        let path = resolver.find_executable(name)?;
        log::debug!("resolved {name} to {}", path.display());
        Some(Stage::External(External {
            name: name.clone(),
            path,
            args: args.to_vec(),
        }))
    }

    fn command(&self, external: &External) -> Command {
        let mut cmd = Command::new(&external.path);
        cmd.arg0(&external.name)
            .args(&external.args)
            .envs(self.state.vars.iter())
            .current_dir(&self.state.current_dir);
        cmd
    }

    /// Every stage external: connect them with OS pipes and let them run together.
    fn run_external_pipeline(
        &self,
        stages: &[External],
        redirects: &[&Redirections],
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        stdout.flush()?;
        let count = stages.len();
        let mut children: Vec<Child> = Vec::with_capacity(count);
        let mut previous: Option<ChildStdout> = None;
        let mut failed = false;

        for (i, external) in stages.iter().enumerate() {
            let is_last = i + 1 == count;
            let mut cmd = self.command(external);
            cmd.stdin(match previous.take() {
                Some(pipe) => Stdio::from(pipe),
                None => Stdio::inherit(),
            });
            cmd.stdout(if is_last {
                Sink::open(redirects[i].stdout.as_ref()).stdio()
            } else {
                Stdio::piped()
            });
            cmd.stderr(Sink::open(redirects[i].stderr.as_ref()).stdio());

            match cmd.spawn() {
                Ok(mut child) => {
                    previous = child.stdout.take();
                    children.push(child);
                }
                Err(err) => {
                    log::debug!("failed to spawn {}: {err}", external.path.display());
                    report_not_found(&external.name, redirects[i], stderr)?;
                    failed = true;
                    break;
                }
            }
        }
        drop(previous);

        let mut code = 0;
        for mut child in children {
            code = exit_code(child.wait()?);
        }
        Ok(if failed { NOT_FOUND } else { code })
    }

    /// At least one builtin: run stages one after another, relaying output
    /// through memory.
    fn run_buffered_pipeline(
        &mut self,
        stages: Vec<Stage>,
        redirects: &[&Redirections],
        stdout: &mut dyn Write,
        stderr: &mut dyn Write,
    ) -> Result<ExitCode> {
        let count = stages.len();
        let mut buffer: Option<Vec<u8>> = None;
        let mut code = 0;

        for (i, stage) in stages.into_iter().enumerate() {
            let is_last = i + 1 == count;
            let stage_redirects = redirects[i];
            match stage {
                Stage::Builtin { name, args } => {
                    // Opened for its side effect only; builtins never write to stderr.
                    drop(Sink::open(stage_redirects.stderr.as_ref()));
                    let mut input: Box<dyn Read> = match buffer.take() {
                        Some(bytes) => Box::new(Cursor::new(bytes)),
                        None => Box::new(io::stdin()),
                    };
                    if is_last {
                        code = match Sink::open(stage_redirects.stdout.as_ref()) {
                            Sink::Inherit => self.run_builtin(&name, &args, &mut input, stdout),
                            Sink::File(mut file) => self.run_builtin(&name, &args, &mut input, &mut file),
                            Sink::Discard => self.run_builtin(&name, &args, &mut input, &mut io::sink()),
                        };
                    } else {
                        let mut captured = Vec::new();
                        code = self.run_builtin(&name, &args, &mut input, &mut captured);
                        buffer = Some(captured);
                    }
                }
                Stage::External(external) => {
                    stdout.flush()?;
                    let name = &external.name;
                    let mut cmd = self.command(&external);
                    cmd.stdin(if buffer.is_some() {
                        Stdio::piped()
                    } else {
                        Stdio::inherit()
                    });
                    cmd.stdout(if is_last {
                        Sink::open(stage_redirects.stdout.as_ref()).stdio()
                    } else {
                        Stdio::piped()
                    });
                    cmd.stderr(Sink::open(stage_redirects.stderr.as_ref()).stdio());

                    let mut child = match cmd.spawn() {
                        Ok(child) => child,
                        Err(err) => {
                            log::debug!("failed to spawn {name}: {err}");
                            report_not_found(name, stage_redirects, stderr)?;
                            return Ok(NOT_FOUND);
                        }
                    };
                    // Feed from another thread so a child that writes before it
                    // finishes reading cannot block on a full stdout pipe.
                    let feeder = match (buffer.take(), child.stdin.take()) {
                        (Some(bytes), Some(mut child_stdin)) => Some(thread::spawn(move || {
                            if let Err(err) = child_stdin.write_all(&bytes) {
                                log::debug!("stdin of pipeline stage closed early: {err}");
                            }
                        })),
                        _ => None,
                    };
                    let output = child
                        .wait_with_output()
                        .with_context(|| format!("failed to wait for {name}"))?;
                    if let Some(feeder) = feeder {
                        if feeder.join().is_err() {
                            log::debug!("stdin feeder for {name} panicked");
                        }
                    }
                    code = exit_code(output.status);
                    if !is_last {
                        buffer = Some(output.stdout);
                    }
                }
            }
        }
        Ok(code)
    }

    /// Run a builtin. Failures writing its output are not reported.
    fn run_builtin(
        &mut self,
        name: &str,
        args: &[String],
        stdin: &mut dyn Read,
        stdout: &mut dyn Write,
    ) -> ExitCode {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let Some(cmd) = self.commands.iter().find_map(|f| f.try_create(name, &args)) else {
            return NOT_FOUND;
        };
        let result = cmd.execute(stdin, stdout, &mut self.state).and_then(|code| {
            stdout.flush()?;
            Ok(code)
        });
        match result {
            Ok(code) => code,
            Err(err) => {
                log::debug!("output of {name} was lost: {err:#}");
                1
            }
        }
    }
}

/// Print `<name>: command not found` to the stage's stderr target, or the shell's.
fn report_not_found(name: &str, redirects: &Redirections, stderr: &mut dyn Write) -> io::Result<()> {
    match Sink::open(redirects.stderr.as_ref()) {
        Sink::File(mut file) => {
            let _ = writeln!(file, "{name}: command not found");
            Ok(())
        }
        Sink::Discard => Ok(()),
        Sink::Inherit => writeln!(stderr, "{name}: command not found"),
    }
}

fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(x) => x,
        None => terminated_by_signal(status),
    }
}

fn terminated_by_signal(exit_status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    if let Some(signal) = ExitStatusExt::signal(&exit_status) {
        128 + signal
    } else if ExitStatusExt::core_dumped(&exit_status) {
        255
    } else {
        -1
    }
}
