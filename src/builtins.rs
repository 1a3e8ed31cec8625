//! Builtins (§4.7): `quit`, `cd`, `jobs`, `fg [n]`, `bg [n]`, `kill %n`.
//!
//! `dispatch_foreground` is the full set, used on the foreground fast
//! path and able to drive the monitor. `run_in_child` is the restricted
//! subset safe to run inside an already-forked child (a pipeline stage,
//! or a backgrounded job): it has no access to the real shell's job
//! table or tty, so job-control builtins don't make sense there and are
//! left unhandled.

use nix::sys::signal::{kill, killpg, Signal};
use std::sync::mpsc::Receiver;

use crate::ipc::WorkerMsg;
use crate::job::{JobState, JobTable, ProcState, FG};
use crate::monitor;
use crate::terminal::TerminalController;

pub const NAMES: &[&str] = &["quit", "cd", "jobs", "fg", "bg", "kill"];

pub fn is_builtin(name: &str) -> bool {
    NAMES.contains(&name)
}

/// Outcome of dispatching a builtin on the foreground fast path.
pub enum Outcome {
    /// The builtin ran; the REPL should continue with this exit code.
    Done(i32),
    /// `quit` ran; the shell should shut down and exit with this code.
    Quit(i32),
}

pub fn dispatch_foreground(
    argv: &[String],
    table: &mut JobTable,
    terminal: &TerminalController,
    chld_rx: &Receiver<WorkerMsg>,
    busy_stop_limit: u32,
) -> Option<Outcome> {
    let (name, args) = argv.split_first()?;
    if !is_builtin(name) {
        return None;
    }
    Some(match name.as_str() {
        "quit" => Outcome::Quit(0),
        "cd" => Outcome::Done(run_cd(args)),
        "jobs" => Outcome::Done(run_jobs(table)),
        "fg" => Outcome::Done(run_fg_bg(table, terminal, chld_rx, busy_stop_limit, args, true)),
        "bg" => Outcome::Done(run_fg_bg(table, terminal, chld_rx, busy_stop_limit, args, false)),
        "kill" => Outcome::Done(run_kill(table, args)),
        _ => unreachable!("is_builtin/dispatch mismatch"),
    })
}

/// Restricted dispatch for a builtin encountered inside an already-forked
/// child. Only `cd` and `quit` make sense without the real job table.
pub fn run_in_child(argv: &[String]) -> Option<i32> {
    let (name, args) = argv.split_first()?;
    match name.as_str() {
        "quit" => Some(0),
        "cd" => Some(run_cd(args)),
        _ => None,
    }
}

/// `strerror(3)` of a raw errno, matching `command.c`'s bare
/// `strerror(errno)` diagnostic (no "(os error N)" suffix).
fn strerror(errno: i32) -> String {
    // SAFETY: the returned pointer refers to a static/thread-local buffer
    // that we copy out of immediately; never held past this call.
    unsafe {
        let ptr = nix::libc::strerror(errno);
        std::ffi::CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn run_cd(args: &[String]) -> i32 {
    let path = match args.first() {
        Some(p) => p.clone(),
        None => match std::env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("cd: HOME not set");
                return 1;
            }
        },
    };
    match std::env::set_current_dir(&path) {
        Ok(()) => 0,
        Err(e) => {
            let msg = strerror(e.raw_os_error().unwrap_or(0));
            eprintln!("cd: {msg}: {path}");
            1
        }
    }
}

fn run_jobs(table: &mut JobTable) -> i32 {
    for line in table.watchjobs(crate::job::Watch::All) {
        println!("{line}");
    }
    0
}

fn parse_job_arg(args: &[String]) -> Option<Option<usize>> {
    match args.first() {
        None => Some(None),
        Some(s) => s.parse::<usize>().ok().map(Some),
    }
}

fn run_fg_bg(
    table: &mut JobTable,
    terminal: &TerminalController,
    chld_rx: &Receiver<WorkerMsg>,
    busy_stop_limit: u32,
    args: &[String],
    to_fg: bool,
) -> i32 {
    let cmd_name = if to_fg { "fg" } else { "bg" };
    let Some(requested) = parse_job_arg(args) else {
        eprintln!("{cmd_name}: usage: {cmd_name} [job]");
        return 1;
    };
    if !resumejob(table, terminal, chld_rx, busy_stop_limit, requested, to_fg) {
        let arg_desc = args.first().cloned().unwrap_or_default();
        eprintln!("{cmd_name}: job not found: {arg_desc}");
        return 1;
    }
    0
}

/// Continue a stopped or running job (§4.7 `resumejob`). `j = None`
/// picks the highest-numbered non-FINISHED job.
pub fn resumejob(
    table: &mut JobTable,
    terminal: &TerminalController,
    chld_rx: &Receiver<WorkerMsg>,
    busy_stop_limit: u32,
    j: Option<usize>,
    to_fg: bool,
) -> bool {
    let Some(j) = j.or_else(|| table.highest_live_job()) else {
        return false;
    };
    if !table.is_occupied(j) || table.state_of(j) == JobState::Finished {
        return false;
    }

    let was_stopped = table.state_of(j) == JobState::Stopped;
    let some_already_running =
        !was_stopped && table.procs_of(j).iter().any(|p| p.state == ProcState::Stopped);

    let Some(pgid) = table.pgid_of(j) else {
        return false;
    };
    let _ = killpg(pgid, Signal::SIGCONT);
    if was_stopped {
        monitor::wait_for_transition(chld_rx, table);
    }

    let cmd = table.command_of(j);
    if was_stopped {
        println!("[{j}] continue '{cmd}'");
    } else if some_already_running {
        println!("[{j}] continue '{cmd}' (some processes were already running)");
    }

    if to_fg {
        table.movejob(j, FG);
        if let Some(tmodes) = table.tmodes_of(FG) {
            let _ = terminal.restore_job_modes(&tmodes);
        }
        monitor::monitorjob(table, terminal, chld_rx, busy_stop_limit);
    }
    true
}

fn run_kill(table: &mut JobTable, args: &[String]) -> i32 {
    let Some(arg) = args.first() else {
        eprintln!("kill: usage: kill %<job>");
        return 1;
    };
    let Some(jobnum) = arg.strip_prefix('%').and_then(|n| n.parse::<usize>().ok()) else {
        eprintln!("kill: usage: kill %<job>");
        return 1;
    };
    if !killjob(table, jobnum) {
        eprintln!("kill: job not found: {arg}");
        return 1;
    }
    0
}

/// Send SIGTERM to every member process of job `j`, plus SIGCONT to any
/// member that is STOPPED so it can observe the signal (§4.7).
pub fn killjob(table: &mut JobTable, j: usize) -> bool {
    if !table.is_occupied(j) || table.state_of(j) == JobState::Finished {
        return false;
    }
    for proc in table.procs_of(j) {
        let _ = kill(proc.pid, Signal::SIGTERM);
        if proc.state == ProcState::Stopped {
            let _ = kill(proc.pid, Signal::SIGCONT);
        }
    }
    true
}
