//! The job monitor (§4.6): hands the tty to the foreground job, waits for
//! it to leave RUNNING, and either reports it as suspended (moving it to
//! a background slot) or lets it fall through as finished.

use nix::sys::signal::{killpg, Signal};
use std::sync::mpsc::Receiver;

use crate::ipc::WorkerMsg;
use crate::job::{self, JobState, JobTable, FG};
use crate::terminal::TerminalController;

pub(crate) fn wait_for_transition(chld_rx: &Receiver<WorkerMsg>, table: &mut JobTable) {
    match chld_rx.recv() {
        Ok(WorkerMsg::Signal(_)) => job::reap(table),
        Ok(WorkerMsg::Cmd(line)) => {
            tracing::warn!(line, "command arrived while monitoring the foreground job; ignoring");
        }
        Err(_) => {}
    }
}

/// Precondition: the FG slot is occupied. Returns the raw wait-status
/// word of the foreground job (or -1 if it ended up stopped).
pub fn monitorjob(
    table: &mut JobTable,
    terminal: &TerminalController,
    chld_rx: &Receiver<WorkerMsg>,
    busy_stop_limit: u32,
) -> i32 {
    let pgid = match table.pgid_of(FG) {
        Some(p) => p,
        None => return -1,
    };

    if let Err(e) = terminal.give_to(pgid) {
        tracing::warn!(error = %e, "failed to hand tty to foreground job");
    }
    let _ = killpg(pgid, Signal::SIGCONT);

    // Busy-stop safety (§4.6): a pathological job can re-raise SIGSTOP
    // immediately after being continued. Bound the number of immediate
    // re-continuations before giving up and falling through to the
    // normal stop path.
    let mut tries = 0;
    while table.state_of(FG) == JobState::Stopped && tries < busy_stop_limit {
        let _ = killpg(pgid, Signal::SIGCONT);
        wait_for_transition(chld_rx, table);
        tries += 1;
    }

    let (state, exitcode) = loop {
        let (state, code) = table.jobstate(FG);
        if state == JobState::Running {
            wait_for_transition(chld_rx, table);
            continue;
        }
        break (state, code);
    };

    if state == JobState::Stopped {
        let new_bg = table.allocjob();
        table.movejob(FG, new_bg);
        match terminal.snapshot() {
            Ok(tmodes) => table.set_tmodes(new_bg, tmodes),
            Err(e) => tracing::warn!(error = %e, "failed to snapshot terminal modes"),
        }
        let cmd = table.command_of(new_bg);
        println!("[{new_bg}] suspended '{cmd}'");
    }

    if let Err(e) = terminal.restore_shell() {
        tracing::warn!(error = %e, "failed to restore shell as foreground process group");
    }

    exitcode.unwrap_or(-1)
}
