use nix::libc;
use nix::pty::Winsize;
use nix::unistd::Pid;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::io::RawFd;

use crate::error::{HarnessError, Result};

/// Terminal queries against the master side of a shell's pty.
///
/// On Linux the master answers `tcgetpgrp` and `tcgetsid` on behalf of the
/// slave, so the harness can see which process group owns the terminal
/// without being in the shell's session itself.
#[derive(Clone, Copy)]
pub struct ControllingTerminal<'a> {
    fd: BorrowedFd<'a>,
}

impl<'a> ControllingTerminal<'a> {
    pub fn new(fd: BorrowedFd<'a>) -> Self {
        Self { fd }
    }

    fn raw(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Get the foreground process group using libc directly
    fn tcgetpgrp_raw(fd: RawFd) -> Result<i32> {
        let pgid = unsafe { libc::tcgetpgrp(fd) };
        if pgid < 0 {
            Err(HarnessError::Inspect(format!(
                "tcgetpgrp failed: {}",
                std::io::Error::last_os_error()
            )))
        } else {
            Ok(pgid)
        }
    }

    /// Get the session id using libc directly
    fn tcgetsid_raw(fd: RawFd) -> Result<i32> {
        let sid = unsafe { libc::tcgetsid(fd) };
        if sid < 0 {
            Err(HarnessError::Inspect(format!(
                "tcgetsid failed: {}",
                std::io::Error::last_os_error()
            )))
        } else {
            Ok(sid)
        }
    }

    /// The process group that currently owns the terminal.
    pub fn foreground_group(&self) -> Result<Pid> {
        Self::tcgetpgrp_raw(self.raw()).map(Pid::from_raw)
    }

    /// The session the terminal is the controlling terminal of.
    pub fn session_id(&self) -> Result<Pid> {
        Self::tcgetsid_raw(self.raw()).map(Pid::from_raw)
    }

    /// Current size as `(rows, cols)`.
    pub fn window_size(&self) -> Result<(u16, u16)> {
        let mut size = Winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(self.raw(), libc::TIOCGWINSZ as _, &mut size as *mut Winsize) };
        if rc < 0 {
            return Err(HarnessError::io("TIOCGWINSZ", std::io::Error::last_os_error()));
        }
        Ok((size.ws_row, size.ws_col))
    }

    pub fn set_window_size(&self, rows: u16, cols: u16) -> Result<()> {
        let size = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let rc = unsafe { libc::ioctl(self.raw(), libc::TIOCSWINSZ as _, &size as *const Winsize) };
        if rc < 0 {
            return Err(HarnessError::io("TIOCSWINSZ", std::io::Error::last_os_error()));
        }
        Ok(())
    }
}
