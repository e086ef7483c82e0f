#![allow(dead_code)]

use async_trait::async_trait;
use std::error::Error;
use std::sync::Mutex;
use std::time::Duration;
use worker_supervisor::command::worker::WorkerCommand;
use worker_supervisor::config::SupervisorConfig;
use worker_supervisor::logs::{ListenerError, LogListener, LogRecord};

/// Retries the execution of `f` after the `interval` has elapsed, until `max_attempts` is reached.
/// # Panics
/// When executing `f` keeps failing after reaching `max_attempts`.
pub fn retry<F>(max_attempts: usize, interval: Duration, mut f: F)
where
    F: FnMut() -> Result<(), Box<dyn Error>>,
{
    let mut last_err = Ok(());
    for _ in 0..max_attempts {
        let Err(err) = f() else {
            return;
        };
        last_err = Err(err);
        std::thread::sleep(interval);
    }
    last_err.unwrap_or_else(|err| panic!("retry failed after {max_attempts} attempts: {err}"))
}

/// Worker running `script` through `sh -c` inside `working_dir`.
pub fn sh_worker(script: &str, working_dir: &std::path::Path) -> WorkerCommand {
    WorkerCommand::new("sh", working_dir).with_args(vec!["-c".to_string(), script.to_string()])
}

/// Supervisor settings for tests: no console forwarding and no pause between restarts.
pub fn test_config(max_restarts: Option<usize>) -> SupervisorConfig {
    SupervisorConfig {
        max_restarts,
        restart_interval: Duration::ZERO,
        forward_logs_to_console: false,
        ..Default::default()
    }
}

/// Listener keeping every record it receives.
#[derive(Default)]
pub struct RecordCollector {
    records: Mutex<Vec<LogRecord>>,
}

impl RecordCollector {
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn raw_lines(&self) -> Vec<String> {
        self.records()
            .iter()
            .map(|record| record.raw().to_string())
            .collect()
    }
}

#[async_trait]
impl LogListener for RecordCollector {
    async fn on_log(&self, record: LogRecord) -> Result<(), ListenerError> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
