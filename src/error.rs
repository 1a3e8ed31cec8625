use std::fmt;

/// Error surfaced at the `main` boundary for failures the shell cannot
/// recover from (broken controlling terminal, failed fork, ...).
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while interpreting one input line.
///
/// Builtins report their own diagnostics directly to stderr and return a
/// plain exit code to the caller rather than surfacing a `ShellError`.
#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error(transparent)]
    Syscall(#[from] nix::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ShellError {
    pub fn syntax(msg: impl fmt::Display) -> Self {
        ShellError::Syntax(msg.to_string())
    }
}
