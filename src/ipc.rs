//! Messages crossing the REPL/worker/signal-thread boundaries (§9 design
//! note: a channel-fed worker standing in for signal-handler reentrancy).

/// Message delivered to the single worker thread that owns the job table.
pub enum WorkerMsg {
    /// A raw signal number forwarded by the signal-catching thread.
    Signal(i32),
    /// One line of input from the REPL.
    Cmd(String),
}

/// Message delivered back to the REPL thread once the worker has finished
/// reacting to a `WorkerMsg::Cmd`.
pub enum ShellMsg {
    /// Resume reading input; carries the last command's exit code (used
    /// only for prompt decoration/diagnostics, not job control).
    Continue(i32),
    /// Shut down with this exit code.
    Quit(i32),
}
