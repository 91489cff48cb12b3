//! Ownership of the controlling terminal for the lifetime of a watch.
//!
//! `TerminalSession::enter` switches the line discipline to cbreak without
//! echo (ISIG stays on so Ctrl-C still raises SIGINT), enters the alternate
//! screen and hides the cursor. `leave` undoes all of it exactly once, and
//! `Drop` calls `leave` so every exit path restores the terminal.
//!
//! | Feature          | Enable        | Disable       |
//! |------------------|---------------|---------------|
//! | Alternate screen | `CSI ? 1049 h`| `CSI ? 1049 l`|
//! | Cursor show/hide | `CSI ? 25 h`  | `CSI ? 25 l`  |

use crate::frame::Frame;
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use std::io::{self, Write};
use std::os::fd::AsFd;

const ALT_SCREEN_ENTER: &[u8] = b"\x1b[?1049h";
const ALT_SCREEN_LEAVE: &[u8] = b"\x1b[?1049l";
const CURSOR_HIDE: &[u8] = b"\x1b[?25l";
const CURSOR_SHOW: &[u8] = b"\x1b[?25h";

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub cols: u16,
    pub rows: u16,
}

impl Default for Size {
    /// Used whenever the live size cannot be queried.
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Errors that abort startup.
#[derive(Debug)]
pub enum TerminalError {
    GetAttributes { source: nix::Error },
    SetAttributes { source: nix::Error },
    Write { source: io::Error },
}

impl std::fmt::Display for TerminalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalError::GetAttributes { source } => {
                write!(f, "failed to read terminal attributes: {}", source)
            }
            TerminalError::SetAttributes { source } => {
                write!(f, "failed to set terminal attributes: {}", source)
            }
            TerminalError::Write { source } => {
                write!(f, "failed to write terminal control sequence: {}", source)
            }
        }
    }
}

impl std::error::Error for TerminalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TerminalError::GetAttributes { source } => Some(source),
            TerminalError::SetAttributes { source } => Some(source),
            TerminalError::Write { source } => Some(source),
        }
    }
}

/// The window size could not be determined; callers fall back to 80x24.
#[derive(Debug)]
pub enum SizeQueryError {
    Query { source: io::Error },
    /// The terminal reported zero rows or columns.
    Empty,
}

impl std::fmt::Display for SizeQueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeQueryError::Query { source } => {
                write!(f, "failed to query terminal size: {}", source)
            }
            SizeQueryError::Empty => write!(f, "terminal reported an empty window size"),
        }
    }
}

impl std::error::Error for SizeQueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SizeQueryError::Query { source } => Some(source),
            SizeQueryError::Empty => None,
        }
    }
}

/// Read the window size of the terminal behind `fd`.
pub fn query_size(fd: impl AsFd) -> Result<Size, SizeQueryError> {
    let ws = rustix::termios::tcgetwinsize(fd).map_err(|e| SizeQueryError::Query {
        source: io::Error::from(e),
    })?;
    if ws.ws_col == 0 || ws.ws_row == 0 {
        return Err(SizeQueryError::Empty);
    }
    Ok(Size {
        cols: ws.ws_col,
        rows: ws.ws_row,
    })
}

/// Where the watch loop sends its frames.
pub trait Screen {
    /// Current dimensions, queried fresh on every call.
    fn size(&self) -> Result<Size, SizeQueryError>;

    /// Write a complete frame in one operation.
    fn present(&mut self, frame: &Frame) -> io::Result<()>;
}

/// Exclusive hold on the controlling terminal.
///
/// `F` is the fd whose line discipline is changed (stdin in production),
/// `W` receives the escape sequences and frames (stdout in production).
pub struct TerminalSession<F: AsFd, W: Write> {
    tty: F,
    out: W,
    original: Termios,
    active: bool,
}

impl<F: AsFd, W: Write> TerminalSession<F, W> {
    /// Take over the terminal.
    ///
    /// Nothing has been modified when the attribute read or write fails. If
    /// the screen switch fails afterwards the attributes are restored before
    /// the error is returned.
    pub fn enter(tty: F, out: W) -> Result<Self, TerminalError> {
        let original =
            termios::tcgetattr(tty.as_fd()).map_err(|e| TerminalError::GetAttributes { source: e })?;

        let mut cbreak = original.clone();
        cbreak.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
        cbreak.local_flags.insert(LocalFlags::ISIG);
        termios::tcsetattr(tty.as_fd(), SetArg::TCSANOW, &cbreak)
            .map_err(|e| TerminalError::SetAttributes { source: e })?;

        let mut session = Self {
            tty,
            out,
            original,
            active: true,
        };
        if let Err(e) = session.write_controls(&[ALT_SCREEN_ENTER, CURSOR_HIDE]) {
            session.leave();
            return Err(TerminalError::Write { source: e });
        }
        tracing::debug!("terminal session entered");
        Ok(session)
    }

    /// Restore the cursor, the primary screen and the original attributes.
    ///
    /// Only the first call has any effect.
    pub fn leave(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;

        if let Err(e) = self.write_controls(&[CURSOR_SHOW, ALT_SCREEN_LEAVE]) {
            tracing::warn!(error = %e, "failed to restore screen buffer");
        }
        // Best-effort: there is nothing left to fall back to.
        if let Err(e) = termios::tcsetattr(self.tty.as_fd(), SetArg::TCSANOW, &self.original) {
            tracing::warn!(error = %e, "failed to restore terminal attributes");
        }
        tracing::debug!("terminal session left");
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    fn write_controls(&mut self, sequences: &[&[u8]]) -> io::Result<()> {
        for seq in sequences {
            self.out.write_all(seq)?;
        }
        self.out.flush()
    }
}

impl<F: AsFd, W: Write> Drop for TerminalSession<F, W> {
    fn drop(&mut self) {
        self.leave();
    }
}

impl<F: AsFd, W: Write + AsFd> Screen for TerminalSession<F, W> {
    fn size(&self) -> Result<Size, SizeQueryError> {
        query_size(self.out.as_fd())
    }

    fn present(&mut self, frame: &Frame) -> io::Result<()> {
        self.out.write_all(frame.as_bytes())?;
        self.out.flush()
    }
}
