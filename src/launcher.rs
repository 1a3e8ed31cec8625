//! The pipeline launcher (§4.4, §4.5): redirection parsing, fork/exec
//! mechanics shared by the single-job and pipeline code paths in
//! `worker`, and the external-command exec wrapper.

use nix::fcntl::{open, OFlag};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, execv, fork, setpgid, ForkResult, Pid};
use std::ffi::CString;
use std::os::unix::io::RawFd;

use crate::error::ShellError;
use crate::token::Token;

/// Rewrite a closed fd slot to `None` so a second close is a no-op and
/// never touches an unrelated fd (§8 idempotent-close law).
pub fn maybe_close(fd: &mut Option<RawFd>) {
    if let Some(raw) = fd.take() {
        let _ = close(raw);
    }
}

/// Drop guard that closes a set of pipe/redirection fds exactly once,
/// used to guarantee cleanup on every return path out of a stage-spawning
/// function (including early `?` returns).
pub struct FdGuard(pub Vec<Option<RawFd>>);

impl Drop for FdGuard {
    fn drop(&mut self) {
        for fd in &mut self.0 {
            maybe_close(fd);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Redirs {
    pub input: Option<RawFd>,
    pub output: Option<RawFd>,
}

/// Consume every redirection operator+filename pair from `tokens` in
/// place, opening the files as it goes. Last occurrence of each side wins
/// (§8 redirection-last-wins law): a later redirection closes whatever
/// fd an earlier one of the same direction had opened.
pub fn strip_redirections(tokens: &mut Vec<Token>) -> Result<Redirs, ShellError> {
    let mut redirs = Redirs::default();
    let mut i = 0;
    while i < tokens.len() {
        let is_input = match tokens[i] {
            Token::Input => true,
            Token::Output => false,
            _ => {
                i += 1;
                continue;
            }
        };
        let filename = match tokens.get(i + 1) {
            Some(Token::Word(w)) => w.clone(),
            _ => {
                return Err(ShellError::syntax(
                    "redirection operator without a filename",
                ))
            }
        };
        let fd = if is_input {
            maybe_close(&mut redirs.input);
            open(filename.as_str(), OFlag::O_RDONLY, Mode::empty())?
        } else {
            maybe_close(&mut redirs.output);
            open(
                filename.as_str(),
                OFlag::O_CREAT | OFlag::O_WRONLY,
                Mode::from_bits_truncate(0o640),
            )?
        };
        if is_input {
            redirs.input = Some(fd);
        } else {
            redirs.output = Some(fd);
        }
        tokens.drain(i..i + 2);
    }
    Ok(redirs)
}

/// Reset the job-control signals a shell normally ignores or handles
/// specially back to their default disposition, so an exec'd program (or
/// a builtin run in a forked child) behaves like any ordinary Unix
/// process (§4.4 step 3).
pub fn reset_child_signal_dispositions() {
    unsafe {
        let _ = signal(Signal::SIGINT, SigHandler::SigDfl);
        let _ = signal(Signal::SIGTSTP, SigHandler::SigDfl);
        let _ = signal(Signal::SIGTTIN, SigHandler::SigDfl);
        let _ = signal(Signal::SIGTTOU, SigHandler::SigDfl);
    }
}

/// What a forked child should do before it either execs or exits:
/// returning `Some(code)` means a builtin already ran and the child
/// should exit with `code` instead of falling through to `exec`.
pub type ChildBuiltin<'a> = dyn Fn(&[String]) -> Option<i32> + 'a;

/// Fork one pipeline stage. `pgid` is `None` for the stage that becomes
/// the pipeline's group leader; subsequent stages pass `Some(leader)`.
/// Both parent and child call `setpgid` with the same arguments so
/// whichever runs first wins (§5 ordering guarantee).
pub fn spawn_stage(
    pgid: Option<Pid>,
    input: Option<RawFd>,
    output: Option<RawFd>,
    argv: &[String],
    run_builtin_in_child: &ChildBuiltin<'_>,
) -> Result<Pid, ShellError> {
    match unsafe { fork()? } {
        ForkResult::Child => {
            let target = pgid.unwrap_or_else(|| Pid::from_raw(0));
            let _ = setpgid(Pid::from_raw(0), target);

            if let Some(fd) = input {
                let _ = dup2(fd, 0);
                if fd != 0 {
                    let _ = close(fd);
                }
            }
            if let Some(fd) = output {
                let _ = dup2(fd, 1);
                if fd != 1 {
                    let _ = close(fd);
                }
            }
            reset_child_signal_dispositions();

            if let Some(code) = run_builtin_in_child(argv) {
                std::process::exit(code);
            }
            exec_external(argv);
        }
        ForkResult::Parent { child, .. } => {
            let target = pgid.unwrap_or(child);
            let _ = setpgid(child, target);
            Ok(child)
        }
    }
}

/// Resolve and exec an external command (§6): if it contains `/`, exec
/// it as-is; otherwise search `PATH`. Never returns on success; prints a
/// diagnostic and exits with failure if every candidate fails.
pub fn exec_external(argv: &[String]) -> ! {
    let Some(cstrings) = to_cstrings(argv) else {
        eprintln!("jcsh: argument contains a NUL byte");
        std::process::exit(1);
    };

    if argv[0].contains('/') {
        let _ = execv(&cstrings[0], &cstrings);
        eprintln!("{}: {}", argv[0], std::io::Error::last_os_error());
        std::process::exit(1);
    }

    match std::env::var("PATH") {
        Ok(path) => {
            for dir in path.split(':') {
                let candidate = if dir.is_empty() {
                    argv[0].clone()
                } else {
                    format!("{dir}/{}", argv[0])
                };
                let Ok(candidate_c) = CString::new(candidate) else {
                    continue;
                };
                let _ = execv(&candidate_c, &cstrings);
                // ENOENT et al: keep trying the rest of PATH.
            }
        }
        // No PATH to search: fall back to treating argv[0] as-is, same
        // as a name that contains a slash.
        Err(_) => {
            let _ = execv(&cstrings[0], &cstrings);
        }
    }

    eprintln!("{}: {}", argv[0], std::io::Error::last_os_error());
    std::process::exit(1);
}

fn to_cstrings(argv: &[String]) -> Option<Vec<CString>> {
    argv.iter().map(|s| CString::new(s.as_str()).ok()).collect()
}
