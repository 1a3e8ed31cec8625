//! An interactive Unix job-control shell core: pipelines, process
//! groups, and terminal hand-off between the shell and its jobs.

pub mod builtins;
pub mod config;
pub mod error;
pub mod ipc;
pub mod job;
pub mod launcher;
pub mod monitor;
pub mod repl;
pub mod signals;
pub mod terminal;
pub mod token;
pub mod worker;

pub use error::DynError;

pub fn run() -> Result<(), DynError> {
    repl::run()
}
