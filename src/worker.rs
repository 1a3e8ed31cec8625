//! The worker thread: the single serialized owner of the job table. It
//! drains `WorkerMsg`s (commands from the REPL, signal events from the
//! sigchld forwarder) one at a time, so every access to `JobTable` in
//! this module is implicitly inside the critical section §5 requires.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::sync::mpsc::{Receiver, SyncSender};
use std::thread;

use crate::builtins;
use crate::config::Config;
use crate::ipc::{ShellMsg, WorkerMsg};
use crate::job::{self, JobTable};
use crate::launcher::{self, Redirs};
use crate::monitor;
use crate::terminal::TerminalController;
use crate::token::{self, Token};

pub struct Worker {
    table: JobTable,
    terminal: TerminalController,
    config: Config,
    exit_val: i32,
}

impl Worker {
    pub fn new(terminal: TerminalController, config: Config) -> Self {
        Worker {
            table: JobTable::new(),
            terminal,
            config,
            exit_val: 0,
        }
    }

    pub fn spawn(
        mut self,
        worker_rx: Receiver<WorkerMsg>,
        shell_tx: SyncSender<ShellMsg>,
    ) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("jcsh-worker".into())
            .spawn(move || {
                for msg in worker_rx.iter() {
                    match msg {
                        WorkerMsg::Cmd(line) => self.handle_cmd(&line, &worker_rx, &shell_tx),
                        WorkerMsg::Signal(sig) if sig == nix::libc::SIGCHLD => {
                            job::reap(&mut self.table);
                            self.report_finished_background();
                        }
                        WorkerMsg::Signal(_) => {}
                    }
                }
            })
            .expect("failed to spawn worker thread")
    }

    fn report_finished_background(&mut self) {
        for line in self.table.watchjobs(job::Watch::Finished) {
            println!("{line}");
        }
    }

    fn handle_cmd(&mut self, line: &str, worker_rx: &Receiver<WorkerMsg>, shell_tx: &SyncSender<ShellMsg>) {
        let tokens = token::tokenize(line);
        let (tokens, bg) = token::split_background(tokens);
        if tokens.is_empty() {
            shell_tx.send(ShellMsg::Continue(self.exit_val)).unwrap();
            return;
        }

        let result = if token::is_pipeline(&tokens) {
            self.do_pipeline(tokens, bg, worker_rx)
        } else {
            self.do_job(tokens, bg, worker_rx)
        };

        match result {
            Ok(JobOutcome::Continue(code)) => {
                self.exit_val = code;
                self.report_finished_background();
                shell_tx.send(ShellMsg::Continue(self.exit_val)).unwrap();
            }
            Ok(JobOutcome::Quit(code)) => {
                self.shutdown();
                shell_tx.send(ShellMsg::Quit(code)).unwrap();
            }
            Err(e) => {
                eprintln!("jcsh: {e}");
                shell_tx.send(ShellMsg::Continue(self.exit_val)).unwrap();
            }
        }
    }

    /// §4.4 `do_job`: a single command, not part of a pipeline.
    fn do_job(
        &mut self,
        mut tokens: Vec<Token>,
        bg: bool,
        worker_rx: &Receiver<WorkerMsg>,
    ) -> Result<JobOutcome, crate::error::ShellError> {
        let redirs = launcher::strip_redirections(&mut tokens)?;
        // Closes whichever of these fds is still open when this scope
        // ends, however we leave it: empty command, a builtin that never
        // touches them, or past a successful fork (the child has its own
        // dup by then, so closing the parent's copy right away is safe).
        let guard = launcher::FdGuard(vec![redirs.input, redirs.output]);
        let argv = token::stage_words(&tokens);
        if argv.is_empty() {
            return Err(crate::error::ShellError::syntax("empty command"));
        }

        if !bg {
            if let Some(outcome) =
                builtins::dispatch_foreground(&argv, &mut self.table, &self.terminal, worker_rx, self.config.busy_stop_limit)
            {
                return Ok(match outcome {
                    builtins::Outcome::Done(code) => JobOutcome::Continue(code),
                    builtins::Outcome::Quit(code) => JobOutcome::Quit(code),
                });
            }
        }

        let pid = launcher::spawn_stage(None, redirs.input, redirs.output, &argv, &builtins::run_in_child)?;
        drop(guard);

        let job_id = self.table.addjob(pid, bg, self.terminal.shell_tmodes());
        self.table.addproc(job_id, pid, &argv);

        if bg {
            let cmd = self.table.command_of(job_id);
            println!("[{job_id}] running '{cmd}'");
            Ok(JobOutcome::Continue(self.exit_val))
        } else {
            let status = monitor::monitorjob(&mut self.table, &self.terminal, worker_rx, self.config.busy_stop_limit);
            Ok(JobOutcome::Continue(status))
        }
    }

    /// §4.5 `do_pipeline`: two or more stages joined by `|`.
    fn do_pipeline(
        &mut self,
        tokens: Vec<Token>,
        bg: bool,
        worker_rx: &Receiver<WorkerMsg>,
    ) -> Result<JobOutcome, crate::error::ShellError> {
        let stage_slices = token::split_stages(&tokens)?;
        let mut stages: Vec<(Vec<Token>, Redirs)> = Vec::with_capacity(stage_slices.len());
        for stage in stage_slices {
            let mut stage_tokens = stage.to_vec();
            let redirs = launcher::strip_redirections(&mut stage_tokens)?;
            if token::stage_words(&stage_tokens).is_empty() {
                // Validate before forking anything (§9 open question).
                for (_, r) in &mut stages {
                    launcher::maybe_close(&mut r.input);
                    launcher::maybe_close(&mut r.output);
                }
                return Err(crate::error::ShellError::syntax(
                    "empty pipeline stage",
                ));
            }
            stages.push((stage_tokens, redirs));
        }

        let n = stages.len();
        let mut pgid: Option<Pid> = None;
        let mut job_id = 0usize;
        let mut job_created = false;
        let mut prev_read: Option<std::os::unix::io::RawFd> = None;

        for (i, (stage_tokens, mut redirs)) in stages.into_iter().enumerate() {
            let argv = token::stage_words(&stage_tokens);

            let stage_input = redirs.input.take().or(prev_read);
            // Only open a pipe when this stage has no explicit output
            // redirection of its own; otherwise the write end would sit
            // open and unused, and the next stage's read end would block
            // forever instead of seeing EOF.
            let (stage_output, next_read) = if i + 1 < n && redirs.output.is_none() {
                let (read_end, write_end) = nix::unistd::pipe()?;
                (Some(write_end), Some(read_end))
            } else {
                (redirs.output.take(), None)
            };

            let spawn_result =
                launcher::spawn_stage(pgid, stage_input, stage_output, &argv, &builtins::run_in_child);

            // Close the ends that were only ever meant for this child.
            if let Some(fd) = prev_read {
                let _ = nix::unistd::close(fd);
            }
            if let Some(fd) = stage_output {
                if Some(fd) != next_read {
                    let _ = nix::unistd::close(fd);
                }
            }
            launcher::maybe_close(&mut redirs.input);

            let pid = spawn_result?;
            if pgid.is_none() {
                pgid = Some(pid);
                job_id = self.table.addjob(pid, bg, self.terminal.shell_tmodes());
                job_created = true;
            }
            if job_created {
                self.table.addproc(job_id, pid, &argv);
            }

            prev_read = next_read;
        }

        if bg {
            let cmd = self.table.command_of(job_id);
            println!("[{job_id}] running '{cmd}'");
            Ok(JobOutcome::Continue(self.exit_val))
        } else {
            let status = monitor::monitorjob(&mut self.table, &self.terminal, worker_rx, self.config.busy_stop_limit);
            Ok(JobOutcome::Continue(status))
        }
    }

    /// §4.8 `shutdownjobs`: terminate every outstanding job and wait for
    /// all of them to finish before the process exits.
    fn shutdown(&mut self) {
        for j in job::BG..self.table.capacity() {
            if let Some(pgid) = self.table.pgid_of(j) {
                let _ = killpg(pgid, Signal::SIGTERM);
                let _ = killpg(pgid, Signal::SIGCONT);
            }
        }

        // Block until every job has finished. Draining waitpid directly
        // here (rather than recv()ing) keeps shutdown simple: the worker
        // is about to exit, so there is no other event source left to
        // race against except SIGCHLD, which reap() itself drains.
        loop {
            job::reap(&mut self.table);
            if (job::BG..self.table.capacity())
                .all(|j| !self.table.is_occupied(j) || self.table.state_of(j) == job::JobState::Finished)
            {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(10));
        }

        self.report_finished_background();
    }
}

enum JobOutcome {
    Continue(i32),
    Quit(i32),
}
