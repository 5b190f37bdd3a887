//! Raw (non-canonical) terminal mode and its guaranteed release.

use std::io::{self, Read};
use std::mem::MaybeUninit;
use std::os::fd::RawFd;

/// Something that can switch a terminal into character-at-a-time input and back.
pub trait TerminalMode {
    /// Disable line buffering and echo. Fails if the descriptor is not a terminal.
    fn enter_raw(&mut self) -> io::Result<()>;

    /// Put back the settings saved by `enter_raw`. A no-op if raw mode is not active.
    fn restore(&mut self) -> io::Result<()>;
}

/// termios-backed implementation for a file descriptor, usually stdin.
pub struct Termios {
    fd: RawFd,
    saved: Option<libc::termios>,
}

impl Termios {
    pub fn new(fd: RawFd) -> Self {
        Self { fd, saved: None }
    }

    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }

    fn get(&self) -> io::Result<libc::termios> {
        let mut termios = MaybeUninit::<libc::termios>::uninit();
        // SAFETY: tcgetattr fully initializes the struct when it returns 0.
        unsafe {
            if libc::tcgetattr(self.fd, termios.as_mut_ptr()) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(termios.assume_init())
        }
    }

    fn set(&self, termios: &libc::termios) -> io::Result<()> {
        // SAFETY: `termios` is a valid, initialized struct obtained from tcgetattr.
        if unsafe { libc::tcsetattr(self.fd, libc::TCSANOW, termios) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl TerminalMode for Termios {
    fn enter_raw(&mut self) -> io::Result<()> {
        let original = self.get()?;
        let mut raw = original;
        // ICRNL stays on so Enter still arrives as '\n'.
        raw.c_lflag &= !(libc::ICANON | libc::ECHO | libc::ISIG | libc::IEXTEN);
        raw.c_cc[libc::VMIN] = 1;
        raw.c_cc[libc::VTIME] = 0;
        self.set(&raw)?;
        self.saved = Some(original);
        Ok(())
    }

    fn restore(&mut self) -> io::Result<()> {
        match self.saved.take() {
            Some(original) => self.set(&original),
            None => Ok(()),
        }
    }
}

/// Holds a terminal in raw mode for as long as it lives.
///
/// Dropping the guard restores the terminal, on normal return, early return,
/// `?` propagation and unwinding alike.
pub struct RawModeGuard<'a> {
    terminal: &'a mut dyn TerminalMode,
}

impl<'a> RawModeGuard<'a> {
    pub fn enter(terminal: &'a mut dyn TerminalMode) -> io::Result<Self> {
        terminal.enter_raw()?;
        Ok(Self { terminal })
    }
}

impl Drop for RawModeGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.terminal.restore() {
            log::warn!("failed to restore terminal mode: {err}");
        }
    }
}

/// Unbuffered reader over a raw descriptor.
///
/// Reading byte by byte straight from the descriptor leaves everything after
/// the current line unread, so child processes sharing stdin still see it.
pub struct FdReader {
    fd: RawFd,
}

impl FdReader {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }

    pub fn stdin() -> Self {
        Self::new(libc::STDIN_FILENO)
    }
}

impl Read for FdReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[derive(Default)]
    struct RecordingTerminal {
        events: Vec<&'static str>,
        refuse: bool,
    }

    impl TerminalMode for RecordingTerminal {
        fn enter_raw(&mut self) -> io::Result<()> {
            if self.refuse {
                return Err(io::Error::other("not a tty"));
            }
            self.events.push("raw");
            Ok(())
        }

        fn restore(&mut self) -> io::Result<()> {
            self.events.push("restore");
            Ok(())
        }
    }

    fn work_then_fail(terminal: &mut dyn TerminalMode) -> io::Result<()> {
        let _guard = RawModeGuard::enter(terminal)?;
        Err(io::Error::other("boom"))
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let mut terminal = RecordingTerminal::default();
        {
            let _guard = RawModeGuard::enter(&mut terminal).unwrap();
        }
        assert_eq!(terminal.events, vec!["raw", "restore"]);
    }

    #[test]
    fn test_guard_restores_on_error_path() {
        let mut terminal = RecordingTerminal::default();
        assert!(work_then_fail(&mut terminal).is_err());
        assert_eq!(terminal.events, vec!["raw", "restore"]);
    }

    #[test]
    fn test_refused_raw_mode_never_restores() {
        let mut terminal = RecordingTerminal {
            refuse: true,
            ..Default::default()
        };
        assert!(RawModeGuard::enter(&mut terminal).is_err());
        assert!(terminal.events.is_empty());
    }

    #[test]
    fn test_fd_reader_reads_descriptor() {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"echo hi\n").unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut reader = FdReader::new(file.as_raw_fd());
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        assert_eq!(text, "echo hi\n");
    }

    #[test]
    fn test_termios_rejects_regular_file() {
        let file = tempfile::tempfile().unwrap();
        let mut termios = Termios::new(file.as_raw_fd());
        assert!(termios.enter_raw().is_err());
        assert!(termios.restore().is_ok());
    }
}
