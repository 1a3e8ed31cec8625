//! SignalGate (§4.1, §9): a dedicated signal-catching thread that turns
//! SIGCHLD into events on a channel, plus the shell-wide signal
//! dispositions set once at startup. Everything downstream of this module
//! treats "the next signal event" as a channel receive rather than a
//! `sigsuspend` wakeup — see SPEC_FULL.md §9 for why that substitution is
//! conformant with the single-writer contract.

use nix::sys::signal::{signal, SigHandler, Signal};
use signal_hook::{consts::SIGCHLD, iterator::Signals};
use std::sync::mpsc::Sender;
use std::thread;

use crate::error::DynError;
use crate::ipc::WorkerMsg;

/// Install the shell-process-wide signal dispositions (§4.8/main):
/// SIGTTOU/SIGTTIN/SIGTSTP are ignored so that terminal I/O and job
/// control signals never stop the shell itself; SIGINT is left to the
/// line reader to intercept as a plain input event rather than a process
/// signal (see `repl`).
pub fn install_shell_dispositions() -> Result<(), DynError> {
    unsafe {
        signal(Signal::SIGTTOU, SigHandler::SigIgn)?;
        signal(Signal::SIGTTIN, SigHandler::SigIgn)?;
        signal(Signal::SIGTSTP, SigHandler::SigIgn)?;
    }
    Ok(())
}

/// Spawn the signal-catching thread. It never touches the job table
/// itself; it only forwards raw signal numbers to `tx`, where the single
/// worker thread (see `worker`) drains and reacts to them.
pub fn spawn_sigchld_forwarder(tx: Sender<WorkerMsg>) -> Result<(), DynError> {
    let mut signals = Signals::new([SIGCHLD])?;
    thread::Builder::new()
        .name("jcsh-sigchld".into())
        .spawn(move || {
            for sig in signals.forever() {
                tracing::debug!(signal = sig, "received signal");
                if tx.send(WorkerMsg::Signal(sig)).is_err() {
                    // Worker thread is gone; nothing left to forward to.
                    return;
                }
            }
        })?;
    Ok(())
}
