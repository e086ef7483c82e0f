use crate::config::SupervisorConfig;
use std::fmt::Display;
use std::time::Duration;

/// Governs whether an exited worker is launched again and how long to pause before doing so.
#[derive(Clone, Debug, PartialEq)]
pub struct RestartPolicy {
    /// `None` means the worker is restarted without limit.
    max_restarts: Option<usize>,
    interval: Duration,
}

impl RestartPolicy {
    pub fn new(max_restarts: Option<usize>, interval: Duration) -> Self {
        Self {
            max_restarts,
            interval,
        }
    }

    /// Whether another restart fits in the budget after `restarts_performed` restarts.
    pub fn should_retry(&self, restarts_performed: usize) -> bool {
        self.max_restarts
            .is_none_or(|max_restarts| restarts_performed < max_restarts)
    }

    /// Executes `sleep_func` with the pause configured between restarts.
    pub fn backoff<S>(&self, sleep_func: S)
    where
        S: FnOnce(Duration),
    {
        sleep_func(self.interval);
    }
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(config: &SupervisorConfig) -> Self {
        RestartPolicy::new(config.max_restarts, config.restart_interval)
    }
}

/// Renders the restart budget as used in log lines, `(2/5)` or `(2/unbounded)`.
pub struct RestartProgress<'a>(pub usize, pub &'a RestartPolicy);

impl Display for RestartProgress<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.1.max_restarts {
            Some(max) => write!(f, "({}/{})", self.0, max),
            None => write!(f, "({}/unbounded)", self.0),
        }
    }
}
