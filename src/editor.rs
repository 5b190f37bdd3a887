//! Byte-at-a-time line editing with first-word completion and history recall.
//!
//! The editor never touches the terminal mode itself; the caller decides which
//! [`InputMode`] applies and holds the terminal in raw mode while a line is read.

use std::collections::HashSet;
use std::io::{self, Read, Write};

const BELL: &str = "\x07";

/// Spaces dropped after an emulated completion: the remainder of an 8-column tab stop.
const TAB_EXPANSION_SPACES: usize = 7;

/// Completion candidates for a first-word prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub builtins: Vec<String>,
    pub executables: Vec<String>,
}

impl Candidates {
    /// Builtins then executables, duplicates removed, first occurrence kept.
    pub fn all(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.builtins
            .iter()
            .chain(&self.executables)
            .filter(|name| seen.insert(name.as_str()))
            .cloned()
            .collect()
    }
}

/// Source of completion candidates.
pub trait Completer {
    fn candidates(&self, prefix: &str) -> Candidates;
}

/// How input reaches the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    /// Terminal in raw mode: the editor echoes, redraws and completes on Tab.
    Raw,
    /// Terminal that refused raw mode: it echoes by itself, and a space after
    /// an unbroken first word stands in for Tab.
    SpaceTrigger,
    /// Not a terminal: bytes are collected until newline, nothing is echoed.
    Plain,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Submit(String),
    Eof,
}

/// Pending state of an ambiguous completion.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Completion {
    NoPending,
    /// One ambiguous Tab was seen with this exact buffer.
    Pending(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    None,
    Esc,
    Csi,
}

pub struct LineEditor {
    prompt: String,
    mode: InputMode,
    buffer: String,
    completion: Completion,
    escape: Escape,
    utf8: Vec<u8>,
    swallow_spaces: usize,
    recall: Option<usize>,
    draft: String,
}

impl LineEditor {
    pub fn new(prompt: impl Into<String>, mode: InputMode) -> Self {
        Self {
            prompt: prompt.into(),
            mode,
            buffer: String::new(),
            completion: Completion::NoPending,
            escape: Escape::None,
            utf8: Vec::new(),
            swallow_spaces: 0,
            recall: None,
            draft: String::new(),
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Reset per-line state and print the prompt.
    pub fn start_line(&mut self, out: &mut dyn Write) -> io::Result<()> {
        self.buffer.clear();
        self.completion = Completion::NoPending;
        self.escape = Escape::None;
        self.utf8.clear();
        self.swallow_spaces = 0;
        self.recall = None;
        self.draft.clear();
        out.write_all(self.prompt.as_bytes())?;
        out.flush()
    }

    /// Print a prompt, then consume `input` until a line is complete.
    ///
    /// Returns `None` at end of input with nothing typed. A partial line
    /// followed by end of input is still returned.
    pub fn read_line(
        &mut self,
        input: &mut dyn Read,
        completer: &dyn Completer,
        history: &[String],
        out: &mut dyn Write,
    ) -> io::Result<Option<String>> {
        self.start_line(out)?;
        let mut byte = [0u8; 1];
        loop {
            let n = match input.read(&mut byte) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            };
            if n == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                if self.mode == InputMode::Raw {
                    out.write_all(b"\n")?;
                }
                return Ok(Some(std::mem::take(&mut self.buffer)));
            }
            match self.feed(byte[0], completer, history, out)? {
                Step::Continue => {}
                Step::Submit(line) => return Ok(Some(line)),
                Step::Eof => return Ok(None),
            }
        }
    }

    /// Advance the state machine by one input byte.
    pub fn feed(
        &mut self,
        byte: u8,
        completer: &dyn Completer,
        history: &[String],
        out: &mut dyn Write,
    ) -> io::Result<Step> {
        log::trace!("editor byte {byte:#04x} in {:?} mode", self.mode);
        let step = match self.mode {
            InputMode::Plain => self.feed_plain(byte),
            InputMode::SpaceTrigger => self.feed_space_trigger(byte, completer, out)?,
            InputMode::Raw => self.feed_raw(byte, completer, history, out)?,
        };
        out.flush()?;
        Ok(step)
    }

    fn feed_plain(&mut self, byte: u8) -> Step {
        match byte {
            b'\n' => Step::Submit(std::mem::take(&mut self.buffer)),
            b'\r' => Step::Continue,
            _ => {
                self.push_byte(byte);
                Step::Continue
            }
        }
    }

    fn feed_space_trigger(
        &mut self,
        byte: u8,
        completer: &dyn Completer,
        out: &mut dyn Write,
    ) -> io::Result<Step> {
        if byte == b' ' && self.swallow_spaces > 0 {
            self.swallow_spaces -= 1;
            return Ok(Step::Continue);
        }
        self.swallow_spaces = 0;
        match byte {
            b'\n' => return Ok(Step::Submit(std::mem::take(&mut self.buffer))),
            b'\r' => {}
            b'\t' => self.complete(completer, out)?,
            b' ' => self.complete_on_space(completer, out)?,
            _ => self.push_byte(byte),
        }
        Ok(Step::Continue)
    }

    fn feed_raw(
        &mut self,
        byte: u8,
        completer: &dyn Completer,
        history: &[String],
        out: &mut dyn Write,
    ) -> io::Result<Step> {
        match self.escape {
            Escape::Esc => {
                self.escape = if byte == b'[' { Escape::Csi } else { Escape::None };
                return Ok(Step::Continue);
            }
            Escape::Csi => {
                // Parameter bytes continue the sequence, a final byte ends it.
                if (0x40..=0x7e).contains(&byte) {
                    self.escape = Escape::None;
                    match byte {
                        b'A' => self.recall(true, history, out)?,
                        b'B' => self.recall(false, history, out)?,
                        _ => {}
                    }
                }
                return Ok(Step::Continue);
            }
            Escape::None => {}
        }

        match byte {
            0x1b => self.escape = Escape::Esc,
            b'\r' => {}
            b'\n' => {
                out.write_all(b"\n")?;
                return Ok(Step::Submit(std::mem::take(&mut self.buffer)));
            }
            b'\t' => self.complete(completer, out)?,
            0x7f | 0x08 => {
                if self.buffer.pop().is_some() {
                    self.completion = Completion::NoPending;
                    self.redraw(out)?;
                } else {
                    out.write_all(BELL.as_bytes())?;
                }
            }
            0x04 if self.buffer.is_empty() => {
                out.write_all(b"\n")?;
                return Ok(Step::Eof);
            }
            0x03 => {
                out.write_all(b"^C\n")?;
                self.start_line(out)?;
            }
            b if b < 0x20 => {}
            _ => {
                let before = self.buffer.len();
                self.push_byte(byte);
                if self.buffer.len() > before {
                    out.write_all(self.buffer[before..].as_bytes())?;
                }
            }
        }
        Ok(Step::Continue)
    }

    /// Collect bytes into whole UTF-8 characters before inserting them.
    fn push_byte(&mut self, byte: u8) {
        self.utf8.push(byte);
        match std::str::from_utf8(&self.utf8).map(str::to_owned) {
            Ok(text) => {
                self.utf8.clear();
                self.insert(&text);
            }
            Err(err) if err.error_len().is_some() => self.utf8.clear(),
            // Incomplete sequence, wait for more bytes.
            Err(_) => {}
        }
    }

    fn insert(&mut self, text: &str) {
        self.buffer.push_str(text);
        self.completion = Completion::NoPending;
    }

    fn redraw(&self, out: &mut dyn Write) -> io::Result<()> {
        if self.mode == InputMode::Raw {
            write!(out, "\r\x1b[K{}{}", self.prompt, self.buffer)?;
        }
        Ok(())
    }

    fn replace_buffer(&mut self, text: String, out: &mut dyn Write) -> io::Result<()> {
        self.buffer = text;
        self.completion = Completion::NoPending;
        self.redraw(out)
    }

    /// Tab on the first word.
    fn complete(&mut self, completer: &dyn Completer, out: &mut dyn Write) -> io::Result<()> {
        if self.buffer.contains(' ') {
            return out.write_all(BELL.as_bytes());
        }
        let prefix = self.buffer.clone();
        let candidates = completer.candidates(&prefix);
        let all = candidates.all();
        log::debug!("completing {prefix:?}: {} candidates", all.len());

        match all.as_slice() {
            [] => {
                self.completion = Completion::NoPending;
                out.write_all(BELL.as_bytes())
            }
            [only] => self.replace_buffer(format!("{only} "), out),
            _ => {
                if let Some(extended) = extend_to_common_prefix(&prefix, &candidates, &all) {
                    return self.replace_buffer(extended, out);
                }
                if self.completion == Completion::Pending(prefix.clone()) {
                    self.list_candidates(all.clone(), out)
                } else {
                    self.completion = Completion::Pending(prefix);
                    out.write_all(BELL.as_bytes())
                }
            }
        }
    }

    /// Print every candidate sorted on one line, then the line being edited.
    fn list_candidates(&mut self, mut all: Vec<String>, out: &mut dyn Write) -> io::Result<()> {
        all.sort();
        write!(out, "\n{}\n", all.join("  "))?;
        self.completion = Completion::NoPending;
        if self.mode == InputMode::Raw {
            write!(out, "{}{}", self.prompt, self.buffer)?;
        }
        Ok(())
    }

    /// Space typed on a cooked terminal, standing in for Tab while the first
    /// word is unbroken.
    ///
    /// A single match or common-prefix progress completes the word. Otherwise
    /// the bell rings and the space is kept, so `ls -l` still types normally;
    /// a second space straight after an ambiguous one takes it back and lists
    /// the candidates.
    fn complete_on_space(&mut self, completer: &dyn Completer, out: &mut dyn Write) -> io::Result<()> {
        if let Completion::Pending(prefix) = &self.completion {
            if self.buffer.strip_suffix(' ') == Some(prefix.as_str()) {
                let prefix = prefix.clone();
                self.buffer.truncate(prefix.len());
                self.swallow_spaces = TAB_EXPANSION_SPACES;
                return self.list_candidates(completer.candidates(&prefix).all(), out);
            }
        }
        if self.buffer.is_empty() || self.buffer.contains(' ') {
            self.insert(" ");
            return Ok(());
        }

        let candidates = completer.candidates(&self.buffer);
        let all = candidates.all();
        let completed = match all.as_slice() {
            [] => None,
            [only] => Some(format!("{only} ")),
            _ => extend_to_common_prefix(&self.buffer, &candidates, &all),
        };
        match completed {
            Some(text) => {
                log::debug!("space completed {:?} to {text:?}", self.buffer);
                self.buffer = text;
                self.completion = Completion::NoPending;
                self.swallow_spaces = TAB_EXPANSION_SPACES;
            }
            None => {
                self.completion = if all.is_empty() {
                    Completion::NoPending
                } else {
                    Completion::Pending(self.buffer.clone())
                };
                self.buffer.push(' ');
                out.write_all(BELL.as_bytes())?;
            }
        }
        Ok(())
    }

    fn recall(&mut self, older: bool, history: &[String], out: &mut dyn Write) -> io::Result<()> {
        let next = match (self.recall, older) {
            (None, true) if !history.is_empty() => Some(history.len() - 1),
            (Some(i), true) if i > 0 => Some(i - 1),
            (Some(i), false) if i + 1 < history.len() => Some(i + 1),
            (Some(_), false) => None,
            _ => return out.write_all(BELL.as_bytes()),
        };
        if self.recall.is_none() {
            self.draft = self.buffer.clone();
        }
        self.recall = next;
        let text = match next {
            Some(i) => history[i].clone(),
            None => std::mem::take(&mut self.draft),
        };
        self.replace_buffer(text, out)
    }
}

/// Longer common prefix of the executable matches, with a trailing space when
/// it picks out exactly one candidate. `None` if there is no progress to make.
fn extend_to_common_prefix(prefix: &str, candidates: &Candidates, all: &[String]) -> Option<String> {
    let common = longest_common_prefix(&candidates.executables)?;
    if common.len() <= prefix.len() || !common.starts_with(prefix) {
        return None;
    }
    let unique = all.iter().filter(|name| name.starts_with(common)).count() == 1;
    Some(if unique {
        format!("{common} ")
    } else {
        common.to_string()
    })
}

fn longest_common_prefix(names: &[String]) -> Option<&str> {
    let (first, rest) = names.split_first()?;
    let mut len = first.len();
    for name in rest {
        len = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(len);
    }
    Some(&first[..len])
}
