//! An interactive POSIX-flavoured shell.
//!
//! A command line goes through [`lexer`] (quoting and escapes), [`parser`]
//! (pipes and output redirections) and is then run by [`Interpreter`], which
//! dispatches each stage either to an in-process builtin or to an executable
//! found on `PATH`. Builtins and externals can be mixed freely in one pipeline.
//!
//! Interactive input is handled by [`editor::LineEditor`], which completes the
//! first word against builtins and `PATH` and recalls earlier lines. The
//! terminal is only held in raw mode (see [`terminal`]) while a line is typed.

mod builtin;
pub mod command;
pub mod editor;
pub mod history;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod resolver;
pub mod state;
pub mod terminal;

pub use interpreter::Interpreter;
pub use state::ShellState;
