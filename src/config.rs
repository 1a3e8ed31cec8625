use std::path::PathBuf;

/// Startup configuration, gathered from the environment once.
///
/// There is no config file: this is a CLI surface, not a daemon. Every
/// field here is either a fixed default or an environment override used
/// to keep the integration tests hermetic (a test run must not read or
/// write the real user's history file).
#[derive(Debug, Clone)]
pub struct Config {
    pub histfile: PathBuf,
    pub prompt: String,
    /// Bound on immediate SIGCONT -> SIGSTOP re-continuation attempts
    /// before `monitorjob` gives up and backgrounds a pathological job.
    pub busy_stop_limit: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let histfile = std::env::var_os("JCSH_HISTFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".jcsh_history")
            });

        let busy_stop_limit = std::env::var("JCSH_BUSY_STOP_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(128);

        Config {
            histfile,
            prompt: "# ".to_string(),
            busy_stop_limit,
        }
    }
}
