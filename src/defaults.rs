use std::time::Duration;

/// Argument passed to the worker binary so it skips its interactive startup delay.
pub const FAST_START_ARG: &str = "faststart";

/// Line fragment the worker prints once it has completed its startup.
pub const READY_MARKER: &str = "アトリは、高性能ですから!";

pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(6);
pub const DEFAULT_RESTART_INTERVAL: Duration = Duration::from_secs(3);

/// Capacity of the queue between the output reader thread and the async dispatcher.
pub const LOG_RECORD_CHANNEL_CAPACITY: usize = 1024;

/// Records queued for a single listener past which the registry warns that it falls behind.
pub const LISTENER_QUEUE_WARN_DEPTH: usize = 10_000;

/// OS status reported for a worker the process table no longer lists.
pub const DEAD_PROCESS_STATUS: &str = "dead";

pub fn default_worker_args() -> Vec<String> {
    vec![FAST_START_ARG.to_string()]
}
