use crate::account_id::AccountID;
use crate::command::worker::WorkerCommand;
use crate::defaults::{
    default_worker_args, DEFAULT_KILL_TIMEOUT, DEFAULT_RESTART_INTERVAL, DEFAULT_STOP_TIMEOUT,
    READY_MARKER,
};
use crate::logging::LoggingConfig;
use duration_str::deserialize_duration;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading config file `{0}`: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Supervision settings shared by every account.
#[derive(Debug, Deserialize, PartialEq, Clone)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long a worker gets to exit after SIGTERM once its output closed.
    #[serde(deserialize_with = "deserialize_duration")]
    pub kill_timeout: Duration,
    /// How long `stop` waits for the restart loop to wind down.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stop_timeout: Duration,
    /// `None` restarts without limit.
    pub max_restarts: Option<usize>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub restart_interval: Duration,
    pub forward_logs_to_console: bool,
    /// Output fragment announcing the worker completed its startup.
    pub ready_marker: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            kill_timeout: DEFAULT_KILL_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            max_restarts: None,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            forward_logs_to_console: true,
            ready_marker: READY_MARKER.to_string(),
        }
    }
}

/// Where the worker binary lives and how it is invoked.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct WorkerConfig {
    pub binary: PathBuf,
    /// Parent of every per-account working directory.
    pub accounts_data_dir: PathBuf,
    #[serde(default = "default_worker_args")]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl WorkerConfig {
    /// Invocation of the worker for `account_id`, running inside the account's data directory.
    pub fn worker_command(&self, account_id: &AccountID) -> WorkerCommand {
        WorkerCommand::new(&self.binary, account_id.data_dir(&self.accounts_data_dir))
            .with_args(self.args.clone())
            .with_env(self.env.clone())
    }
}

#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Config {
    #[serde(default, rename = "log")]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    pub worker: WorkerConfig,
}

impl Config {
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        Self::from_yaml(&content)
    }
}
