//! The signal-safe job table (§3, §4.2).
//!
//! Positionally indexed: slot 0 is the reserved foreground slot (`FG`),
//! slots `BG..` are background slots. A slot with `pgid == 0` is free.
//! Every method here assumes the caller has already serialized access
//! against the reaper (see `signals` and `worker`) — the table itself
//! does no locking.

use nix::sys::termios::Termios;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

pub const FG: usize = 0;
pub const BG: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Running,
    Stopped,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Finished,
}

#[derive(Debug, Clone)]
pub struct Proc {
    pub pid: Pid,
    pub state: ProcState,
    /// Raw `waitpid` status word; `None` until the process is FINISHED.
    pub exitcode: Option<i32>,
}

#[derive(Debug, Clone)]
struct Job {
    /// 0 means the slot is free.
    pgid: i32,
    procs: Vec<Proc>,
    state: JobState,
    tmodes: Option<Termios>,
    command: String,
}

impl Job {
    fn free() -> Self {
        Job {
            pgid: 0,
            procs: Vec::new(),
            state: JobState::Finished,
            tmodes: None,
            command: String::new(),
        }
    }

    fn is_free(&self) -> bool {
        self.pgid == 0
    }
}

/// What `watchjobs` should report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watch {
    All,
    Running,
    Stopped,
    Finished,
}

/// One line of the status-reporting protocol (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusLine {
    Running { job: usize, cmd: String },
    Suspended { job: usize, cmd: String },
    Exited { job: usize, cmd: String, status: i32 },
    Killed { job: usize, cmd: String, signal: i32 },
    Unidentified { job: usize, cmd: String },
}

impl std::fmt::Display for StatusLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusLine::Running { job, cmd } => write!(f, "[{job}] running '{cmd}'"),
            StatusLine::Suspended { job, cmd } => write!(f, "[{job}] suspended '{cmd}'"),
            StatusLine::Exited { job, cmd, status } => {
                write!(f, "[{job}] exited '{cmd}', status={status}")
            }
            StatusLine::Killed { job, cmd, signal } => {
                write!(f, "[{job}] killed '{cmd}' by signal {signal}")
            }
            StatusLine::Unidentified { job, cmd } => {
                write!(f, "[{job}] '{cmd}' unidentified termination")
            }
        }
    }
}

pub struct JobTable {
    jobs: Vec<Job>,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable {
            jobs: vec![Job::free()],
        }
    }

    pub(crate) fn allocjob(&mut self) -> usize {
        for j in BG..self.jobs.len() {
            if self.jobs[j].is_free() {
                return j;
            }
        }
        self.jobs.push(Job::free());
        self.jobs.len() - 1
    }

    /// Create a job occupying the FG slot (`bg == false`) or a fresh/free
    /// background slot. Returns the job index.
    pub fn addjob(&mut self, pgid: Pid, bg: bool, shell_tmodes: Termios) -> usize {
        let j = if bg { self.allocjob() } else { FG };
        self.jobs[j] = Job {
            pgid: pgid.as_raw(),
            procs: Vec::new(),
            state: JobState::Running,
            tmodes: Some(shell_tmodes),
            command: String::new(),
        };
        j
    }

    /// Append a pipeline stage's process to job `j`, extending its
    /// textual command with `" | "`-joined argv (no leading separator on
    /// the first stage).
    pub fn addproc(&mut self, j: usize, pid: Pid, argv: &[String]) {
        let job = &mut self.jobs[j];
        if !job.command.is_empty() {
            job.command.push_str(" | ");
        }
        job.command.push_str(&argv.join(" "));
        job.procs.push(Proc {
            pid,
            state: ProcState::Running,
            exitcode: None,
        });
    }

    fn deljob(&mut self, j: usize) {
        debug_assert_eq!(self.jobs[j].state, JobState::Finished);
        self.jobs[j] = Job::free();
    }

    /// Move the record at `from` into slot `to`, which must be free.
    /// `from` is left free.
    pub fn movejob(&mut self, from: usize, to: usize) {
        if to >= self.jobs.len() {
            self.jobs.resize_with(to + 1, Job::free);
        }
        debug_assert!(self.jobs[to].is_free());
        let moved = std::mem::replace(&mut self.jobs[from], Job::free());
        self.jobs[to] = moved;
    }

    pub fn is_occupied(&self, j: usize) -> bool {
        j < self.jobs.len() && !self.jobs[j].is_free()
    }

    pub fn pgid_of(&self, j: usize) -> Option<Pid> {
        self.is_occupied(j).then(|| Pid::from_raw(self.jobs[j].pgid))
    }

    pub fn command_of(&self, j: usize) -> String {
        self.jobs.get(j).map(|job| job.command.clone()).unwrap_or_default()
    }

    pub fn tmodes_of(&self, j: usize) -> Option<Termios> {
        self.jobs.get(j).and_then(|job| job.tmodes.clone())
    }

    pub fn set_tmodes(&mut self, j: usize, tmodes: Termios) {
        if let Some(job) = self.jobs.get_mut(j) {
            job.tmodes = Some(tmodes);
        }
    }

    /// Peek at job `j`'s current state without the FINISHED-frees-the-slot
    /// side effect of `jobstate`.
    pub fn state_of(&self, j: usize) -> JobState {
        self.jobs
            .get(j)
            .map(|job| job.state)
            .unwrap_or(JobState::Finished)
    }

    fn exitcode(&self, j: usize) -> Option<i32> {
        self.jobs[j].procs.last().and_then(|p| p.exitcode)
    }

    /// Read job `j`'s state. If it is FINISHED, also free the slot and
    /// return the last process's raw status.
    pub fn jobstate(&mut self, j: usize) -> (JobState, Option<i32>) {
        let state = self.jobs[j].state;
        if state == JobState::Finished {
            let code = self.exitcode(j);
            self.deljob(j);
            (state, code)
        } else {
            (state, None)
        }
    }

    /// Highest-numbered non-FINISHED job, for `fg`/`bg` with no argument.
    pub fn highest_live_job(&self) -> Option<usize> {
        (BG..self.jobs.len())
            .rev()
            .find(|&j| self.is_occupied(j) && self.jobs[j].state != JobState::Finished)
    }

    /// Number of slots currently allocated (including free ones below the
    /// high-water mark). Used only to bound a full-table scan.
    pub fn capacity(&self) -> usize {
        self.jobs.len()
    }

    /// Every member pid of job `j`, if occupied.
    pub fn procs_of(&self, j: usize) -> &[Proc] {
        self.jobs.get(j).map(|job| job.procs.as_slice()).unwrap_or(&[])
    }

    fn recompute_state(&mut self, j: usize) {
        let job = &mut self.jobs[j];
        job.state = if job.procs.iter().any(|p| p.state == ProcState::Running) {
            JobState::Running
        } else if job.procs.iter().any(|p| p.state == ProcState::Stopped) {
            JobState::Stopped
        } else {
            JobState::Finished
        };
    }

    /// Apply one reaped `waitpid` status to its owning process and
    /// recompute that job's aggregate state (§4.1). Called only from the
    /// reaper.
    pub fn apply_wait_status(&mut self, status: WaitStatus) {
        let pid = match status.pid() {
            Some(pid) => pid,
            None => return,
        };
        for j in 0..self.jobs.len() {
            let Some(p) = self.jobs[j].procs.iter_mut().find(|p| p.pid == pid) else {
                continue;
            };
            match status {
                WaitStatus::Continued(_) => p.state = ProcState::Running,
                WaitStatus::Stopped(_, _) => p.state = ProcState::Stopped,
                WaitStatus::Exited(_, code) => {
                    p.state = ProcState::Finished;
                    // Classic glibc wait-status encoding: exit code in bits 8..15.
                    p.exitcode = Some((code & 0xff) << 8);
                }
                WaitStatus::Signaled(_, sig, core) => {
                    p.state = ProcState::Finished;
                    let core_flag = if core { 0x80 } else { 0 };
                    p.exitcode = Some(sig as i32 | core_flag);
                }
                _ => {}
            }
            self.recompute_state(j);
            return;
        }
    }

    /// Report state of jobs matching `which`; FINISHED jobs are freed
    /// as a side effect (§4.2, §6).
    pub fn watchjobs(&mut self, which: Watch) -> Vec<StatusLine> {
        let mut lines = Vec::new();
        let mut j = BG;
        while j < self.jobs.len() {
            if self.jobs[j].is_free() {
                j += 1;
                continue;
            }
            let state = self.jobs[j].state;
            let matches = which == Watch::All
                || (which == Watch::Running && state == JobState::Running)
                || (which == Watch::Stopped && state == JobState::Stopped)
                || (which == Watch::Finished && state == JobState::Finished);
            if !matches {
                j += 1;
                continue;
            }
            let cmd = self.jobs[j].command.clone();
            match state {
                JobState::Running => lines.push(StatusLine::Running { job: j, cmd }),
                JobState::Stopped => lines.push(StatusLine::Suspended { job: j, cmd }),
                JobState::Finished => {
                    let wstatus = self.exitcode(j).unwrap_or(0);
                    lines.push(decode_finished(j, cmd, wstatus));
                    self.deljob(j);
                }
            }
            j += 1;
        }
        lines
    }
}

/// Drain every currently-reapable child (§4.1): `waitpid(-1, WNOHANG |
/// WUNTRACED | WCONTINUED)` in a loop, applying each status to the
/// table. Signals coalesce, so one wakeup can correspond to several
/// reapable events.
pub fn reap(table: &mut JobTable) {
    use nix::sys::wait::{waitpid, WaitPidFlag};
    let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
    loop {
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) => break,
            Ok(status) => table.apply_wait_status(status),
            Err(nix::Error::EINTR) => continue,
            Err(nix::Error::ECHILD) => break,
            Err(e) => {
                tracing::warn!(error = %e, "waitpid failed");
                break;
            }
        }
    }
}

fn decode_finished(job: usize, cmd: String, wstatus: i32) -> StatusLine {
    if nix::libc::WIFEXITED(wstatus) {
        StatusLine::Exited {
            job,
            cmd,
            status: nix::libc::WEXITSTATUS(wstatus),
        }
    } else if nix::libc::WIFSIGNALED(wstatus) {
        StatusLine::Killed {
            job,
            cmd,
            signal: nix::libc::WTERMSIG(wstatus),
        }
    } else {
        StatusLine::Unidentified { job, cmd }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_tmodes() -> Termios {
        // SAFETY-free: construct via stdin only if it's a tty. Tests that
        // need a Termios snapshot run against a pty-backed fd; the pure
        // state-machine tests below never touch tmodes.
        unsafe { std::mem::zeroed() }
    }

    #[test]
    fn addjob_background_allocates_lowest_free_slot() {
        let mut table = JobTable::new();
        let j1 = table.addjob(Pid::from_raw(100), true, dummy_tmodes());
        let j2 = table.addjob(Pid::from_raw(200), true, dummy_tmodes());
        assert_eq!(j1, BG);
        assert_eq!(j2, BG + 1);
    }

    #[test]
    fn addjob_foreground_uses_fg_slot() {
        let mut table = JobTable::new();
        let j = table.addjob(Pid::from_raw(100), false, dummy_tmodes());
        assert_eq!(j, FG);
    }

    #[test]
    fn freed_background_slot_is_reused() {
        let mut table = JobTable::new();
        let j1 = table.addjob(Pid::from_raw(100), true, dummy_tmodes());
        table.addproc(j1, Pid::from_raw(100), &["sleep".into()]);
        table.apply_wait_status(WaitStatus::Exited(Pid::from_raw(100), 0));
        assert_eq!(table.jobstate(j1).0, JobState::Finished);
        assert!(!table.is_occupied(j1));

        let j2 = table.addjob(Pid::from_raw(300), true, dummy_tmodes());
        assert_eq!(j2, j1, "freed slot should be reused before growing the table");
    }

    #[test]
    fn job_state_tracks_aggregate_of_its_processes() {
        let mut table = JobTable::new();
        let j = table.addjob(Pid::from_raw(10), true, dummy_tmodes());
        table.addproc(j, Pid::from_raw(10), &["a".into()]);
        table.addproc(j, Pid::from_raw(11), &["b".into()]);

        table.apply_wait_status(WaitStatus::Stopped(Pid::from_raw(10), nix::sys::signal::Signal::SIGTSTP));
        assert_eq!(table.jobstate(j).0, JobState::Running); // pid 11 still running

        table.apply_wait_status(WaitStatus::Stopped(Pid::from_raw(11), nix::sys::signal::Signal::SIGTSTP));
        assert_eq!(table.jobstate(j).0, JobState::Stopped);

        table.apply_wait_status(WaitStatus::Continued(Pid::from_raw(10)));
        table.apply_wait_status(WaitStatus::Continued(Pid::from_raw(11)));
        assert_eq!(table.jobstate(j).0, JobState::Running);

        table.apply_wait_status(WaitStatus::Exited(Pid::from_raw(10), 0));
        table.apply_wait_status(WaitStatus::Exited(Pid::from_raw(11), 3));
        let (state, code) = table.jobstate(j);
        assert_eq!(state, JobState::Finished);
        assert!(nix::libc::WIFEXITED(code.unwrap()));
        assert_eq!(nix::libc::WEXITSTATUS(code.unwrap()), 3);
        assert!(!table.is_occupied(j), "jobstate() on FINISHED frees the slot");
    }

    #[test]
    fn watchjobs_reports_and_frees_finished_jobs() {
        let mut table = JobTable::new();
        let j = table.addjob(Pid::from_raw(42), true, dummy_tmodes());
        table.addproc(j, Pid::from_raw(42), &["echo".into(), "hi".into()]);
        table.apply_wait_status(WaitStatus::Signaled(Pid::from_raw(42), nix::sys::signal::Signal::SIGTERM, false));

        let lines = table.watchjobs(Watch::Finished);
        assert_eq!(lines.len(), 1);
        match &lines[0] {
            StatusLine::Killed { job, cmd, signal } => {
                assert_eq!(*job, j);
                assert_eq!(cmd, "echo hi");
                assert_eq!(*signal, nix::libc::SIGTERM);
            }
            other => panic!("unexpected status line: {other:?}"),
        }
        assert!(!table.is_occupied(j));
    }

    #[test]
    fn movejob_transfers_record_and_frees_source() {
        let mut table = JobTable::new();
        let fg = table.addjob(Pid::from_raw(7), false, dummy_tmodes());
        table.addproc(fg, Pid::from_raw(7), &["vi".into()]);
        table.apply_wait_status(WaitStatus::Stopped(Pid::from_raw(7), nix::sys::signal::Signal::SIGTSTP));

        let bg = table.allocjob();
        table.movejob(fg, bg);
        assert!(!table.is_occupied(fg));
        assert!(table.is_occupied(bg));
        assert_eq!(table.command_of(bg), "vi");
    }
}
