//! Raw terminal mode with scoped restore.

use std::io;

use tracing::{debug, warn};

/// Switches the controlling terminal in and out of raw mode.
pub trait RawTerminal: Send + Sync {
  fn enable_raw(&self) -> io::Result<()>;

  fn restore(&self) -> io::Result<()>;
}

/// The process's terminal, via `crossterm`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrosstermTerminal;

impl RawTerminal for CrosstermTerminal {
  fn enable_raw(&self) -> io::Result<()> {
    crossterm::terminal::enable_raw_mode()
  }

  fn restore(&self) -> io::Result<()> {
    crossterm::terminal::disable_raw_mode()
  }
}

/// Keeps the terminal in raw mode until dropped.
pub struct RawModeGuard<'a> {
  terminal: &'a dyn RawTerminal,
}

impl<'a> RawModeGuard<'a> {
  pub fn acquire(terminal: &'a dyn RawTerminal) -> io::Result<Self> {
    terminal.enable_raw()?;
    debug!("terminal switched to raw mode");
    Ok(Self { terminal })
  }
}

impl Drop for RawModeGuard<'_> {
  fn drop(&mut self) {
    if let Err(e) = self.terminal.restore() {
      warn!(error = %e, "failed to restore terminal mode");
    }
  }
}
