use anyhow::Result;
use argh::FromArgs;
use crabsh::editor::InputMode;
use crabsh::terminal::Termios;
use crabsh::{Interpreter, ShellState};
use env_logger::Env;
use std::io::IsTerminal;
use std::path::PathBuf;

#[derive(FromArgs)]
/// An interactive shell with tab completion, pipelines and redirections.
struct Cli {
    #[argh(option)]
    /// history file loaded at start and written on exit; defaults to $HISTFILE.
    histfile: Option<PathBuf>,

    #[argh(switch)]
    /// keep the terminal in line mode; a space after the first word completes it.
    no_raw: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("error")).init();
    let cli: Cli = argh::from_env();

    let mut shell = Interpreter::new(ShellState::new());
    let histfile = cli.histfile.or_else(|| {
        shell
            .state()
            .get_var("HISTFILE")
            .filter(|name| !name.is_empty())
            .map(|name| shell.state().resolve_path(name))
    });
    if let Some(path) = &histfile {
        match shell.load_history(path) {
            Ok(count) => log::info!("loaded {count} history entries from {}", path.display()),
            Err(err) => log::debug!("{err:#}"),
        }
    }

    let mode = if !std::io::stdin().is_terminal() {
        InputMode::Plain
    } else if cli.no_raw {
        InputMode::SpaceTrigger
    } else {
        InputMode::Raw
    };
    log::debug!("input mode {mode:?}");

    let mut terminal = Termios::stdin();
    let outcome = shell.repl(mode, &mut terminal);

    if let Some(path) = &histfile {
        if let Err(err) = shell.state_mut().history.write_to(path) {
            log::warn!("failed to save history: {err:#}");
        }
    }
    outcome
}
