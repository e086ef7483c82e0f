use super::shared::SharedState;
use super::SupervisorState;
use crate::account_id::AccountID;
use crate::command::command_os::CommandOSNotStarted;
use crate::command::error::CommandError;
use crate::command::restart_policy::{RestartPolicy, RestartProgress};
use crate::command::worker::WorkerCommand;
use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::logs::dispatcher::RecordSender;
use crate::logs::record::LogRecord;
use std::io::{BufRead, BufReader, ErrorKind, PipeReader};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Time a worker gets to exit on its own once its output closed, before it is asked to.
const EXIT_GRACE_PERIOD: Duration = Duration::from_millis(200);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the restart loop thread owns.
pub(super) struct RestartLoop {
    pub(super) account_id: AccountID,
    pub(super) worker: WorkerCommand,
    pub(super) restart_policy: RestartPolicy,
    pub(super) kill_timeout: Duration,
    pub(super) ready_marker: String,
    pub(super) shared: Arc<SharedState>,
    pub(super) records: RecordSender,
}

impl RestartLoop {
    /// Launches the worker over and over until a stop is requested or the restart budget runs
    /// out.
    pub(super) fn run(self, stop_consumer: EventConsumer<CancellationMessage>) {
        let account_id = self.account_id;

        loop {
            if self.shared.is_stopping() {
                debug!(%account_id, "Supervisor stopped before starting worker");
                break;
            }

            self.shared.set_lifecycle(SupervisorState::Starting);
            info!(%account_id, "Starting worker");

            let exit_code = match self.run_worker() {
                Ok(Some(exit_code)) => exit_code,
                Ok(None) => {
                    debug!(%account_id, "Supervisor stopped before starting worker");
                    break;
                }
                Err(err) => {
                    error!(%account_id, "Running worker: {err}");
                    0
                }
            };

            if self.shared.is_stopping() {
                info!(%account_id, exit_code, "Worker stopped");
                break;
            }

            if !self.restart_policy.should_retry(self.shared.totals().restarts) {
                warn!(
                    %account_id,
                    exit_code,
                    "Restart budget exhausted, worker won't restart anymore"
                );
                break;
            }

            let restarts = self.shared.count_restart();
            warn!(
                %account_id,
                exit_code,
                "Worker exited, restarting {}",
                RestartProgress(restarts, &self.restart_policy)
            );

            self.shared.set_lifecycle(SupervisorState::Restarting);
            if wait_restart(&self.restart_policy, &stop_consumer) {
                info!(%account_id, "Restart cancelled");
                break;
            }
        }

        self.shared.set_lifecycle(SupervisorState::Stopped);
    }

    /// One worker run: spawn, stream its output and collect the exit code. `None` when a stop
    /// was requested before the worker could be spawned.
    fn run_worker(&self) -> Result<Option<i32>, CommandError> {
        let output = {
            let mut slot = self.shared.slot();
            if slot.stopping {
                return Ok(None);
            }

            let started = CommandOSNotStarted::new(self.account_id, &self.worker).start()?;
            info!(account_id = %self.account_id, pid = started.get_pid(), "Worker started");
            slot.hold(started)?
        };

        self.shared.set_lifecycle(SupervisorState::Running);
        self.read_output(output);
        self.wait_exit().map(Some)
    }

    /// Turns every line of the merged output into a record until the stream closes.
    fn read_output(&self, output: PipeReader) {
        let account_id = self.account_id;
        let mut reader = BufReader::new(output);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%account_id, "Reading worker output: {err}");
                    break;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if !self.ready_marker.is_empty() && line.contains(&self.ready_marker) {
                info!(%account_id, "Worker has successfully started");
            }

            self.shared.count_log();
            // A closed queue only happens while the runtime shuts down, the line still counts.
            let _ = self.records.send_blocking(LogRecord::parse(line));
        }
    }

    /// Collects the exit code once the output closed, escalating to SIGTERM and then SIGKILL
    /// when the worker lingers.
    fn wait_exit(&self) -> Result<i32, CommandError> {
        let account_id = self.account_id;

        if let Some(exit_code) = self.poll_exit_code(EXIT_GRACE_PERIOD)? {
            return Ok(exit_code);
        }

        debug!(%account_id, "Worker output closed but process still running, terminating");
        self.shared.with_process(|process| process.terminate())?;
        if let Some(exit_code) = self.poll_exit_code(self.kill_timeout)? {
            return Ok(exit_code);
        }

        warn!(%account_id, "Worker did not exit after {:?}, killing", self.kill_timeout);
        self.shared.with_process(|process| process.kill_and_wait())
    }

    fn poll_exit_code(&self, timeout: Duration) -> Result<Option<i32>, CommandError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(exit_code) = self.shared.with_process(|process| process.exit_code())? {
                return Ok(Some(exit_code));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Waits for the restart policy interval and returns whether it was cancelled or not.
fn wait_restart(
    restart_policy: &RestartPolicy,
    stop_consumer: &EventConsumer<CancellationMessage>,
) -> bool {
    let mut cancelled = false;
    restart_policy.backoff(|duration| {
        // early exit if the supervisor is stopped while waiting
        if stop_consumer.is_cancelled_with_timeout(duration) {
            cancelled = true;
        }
    });
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::channel::pub_sub;
    use std::thread;

    #[test]
    fn wait_restart_not_cancelled() {
        let (_publisher, consumer) = pub_sub::<CancellationMessage>();
        let policy = RestartPolicy::new(None, Duration::from_millis(20));

        assert!(!wait_restart(&policy, &consumer));
    }

    #[test]
    fn wait_restart_cancelled_early() {
        let (publisher, consumer) = pub_sub::<CancellationMessage>();
        let policy = RestartPolicy::new(None, Duration::from_secs(30));

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            publisher.publish(()).unwrap();
        });

        let start = Instant::now();
        assert!(wait_restart(&policy, &consumer));
        assert!(start.elapsed() < Duration::from_secs(5));
        canceller.join().unwrap();
    }
}
