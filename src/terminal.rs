//! TerminalController (§4.3): owns the duplicated controlling-tty fd and
//! the shell's saved terminal modes, and hands the tty between the shell
//! and a foreground job's process group.

use nix::fcntl::{fcntl, FcntlArg, FdFlag};
use nix::sys::termios::{tcgetattr, tcsetattr, SetArg, Termios};
use nix::unistd::{dup, tcsetpgrp, Pid};
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::DynError;

pub struct TerminalController {
    tty_fd: RawFd,
    shell_pgid: Pid,
    shell_tmodes: Termios,
}

impl TerminalController {
    /// Duplicate stdin (with close-on-exec set), take control of the
    /// terminal on behalf of the shell's own process group, and snapshot
    /// the shell's terminal modes. Must run while the shell is already
    /// the foreground process group of its session.
    pub fn init() -> Result<Self, DynError> {
        let stdin = std::io::stdin();
        if !nix::unistd::isatty(stdin.as_raw_fd())? {
            return Err("jcsh requires a controlling terminal on stdin".into());
        }

        let tty_fd = dup(stdin.as_raw_fd())?;
        fcntl(tty_fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;

        let shell_pgid = nix::unistd::getpgrp();
        tcsetpgrp(tty_fd, shell_pgid)?;

        let shell_tmodes = tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(tty_fd) })?;

        Ok(TerminalController {
            tty_fd,
            shell_pgid,
            shell_tmodes,
        })
    }

    pub fn shell_tmodes(&self) -> Termios {
        self.shell_tmodes.clone()
    }

    pub fn give_to(&self, pgid: Pid) -> nix::Result<()> {
        tcsetpgrp(self.tty_fd, pgid)
    }

    /// Return the tty to the shell's own process group and restore the
    /// shell's saved terminal modes.
    pub fn restore_shell(&self) -> nix::Result<()> {
        tcsetpgrp(self.tty_fd, self.shell_pgid)?;
        tcsetattr(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(self.tty_fd) },
            SetArg::TCSANOW,
            &self.shell_tmodes,
        )
    }

    /// Snapshot the terminal's current modes, as left behind by a job
    /// that was just stopped (called right before backgrounding it).
    pub fn snapshot(&self) -> nix::Result<Termios> {
        tcgetattr(unsafe { std::os::fd::BorrowedFd::borrow_raw(self.tty_fd) })
    }

    /// Apply a job's saved modes to the terminal before resuming it in
    /// the foreground.
    pub fn restore_job_modes(&self, tmodes: &Termios) -> nix::Result<()> {
        tcsetattr(
            unsafe { std::os::fd::BorrowedFd::borrow_raw(self.tty_fd) },
            SetArg::TCSANOW,
            tmodes,
        )
    }
}

impl Drop for TerminalController {
    fn drop(&mut self) {
        let _ = nix::unistd::close(self.tty_fd);
    }
}
