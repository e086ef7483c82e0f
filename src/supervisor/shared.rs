use super::SupervisorState;
use crate::account_id::AccountID;
use crate::command::command_os::CommandOSStarted;
use crate::command::error::CommandError;
use crate::status::Totals;
use std::io::PipeReader;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Latest worker handle plus the stop request, guarded together so a spawn can never slip in
/// after a stop has been requested.
#[derive(Default)]
pub(super) struct ProcessSlot {
    /// Last spawned worker. Kept after it exits so its exit code stays observable.
    pub(super) process: Option<CommandOSStarted>,
    pub(super) stopping: bool,
}

impl ProcessSlot {
    /// Stores `started` as the live worker and hands out its output. A worker whose output is
    /// not available is killed, nothing could ever read it.
    pub(super) fn hold(
        &mut self,
        mut started: CommandOSStarted,
    ) -> Result<PipeReader, CommandError> {
        let output = started.take_output();
        if output.is_err() {
            if let Err(err) = started.kill_and_wait() {
                warn!(pid = started.get_pid(), "Killing worker without output: {err}");
            }
        }
        self.process = Some(started);
        output
    }
}

/// State shared between a [`super::Supervisor`] and its restart loop thread.
pub(super) struct SharedState {
    account_id: AccountID,
    slot: Mutex<ProcessSlot>,
    lifecycle: Mutex<SupervisorState>,
    total_logs: AtomicU64,
    restarts: AtomicUsize,
}

impl SharedState {
    pub(super) fn new(account_id: AccountID) -> Self {
        Self {
            account_id,
            slot: Mutex::default(),
            lifecycle: Mutex::new(SupervisorState::Idle),
            total_logs: AtomicU64::default(),
            restarts: AtomicUsize::default(),
        }
    }

    pub(super) fn slot(&self) -> MutexGuard<'_, ProcessSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn lifecycle(&self) -> SupervisorState {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn set_lifecycle(&self, state: SupervisorState) {
        *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub(super) fn count_log(&self) {
        self.total_logs.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one more restart and returns the new total.
    pub(super) fn count_restart(&self) -> usize {
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(super) fn totals(&self) -> Totals {
        Totals {
            total_logs: self.total_logs.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
        }
    }

    pub(super) fn is_stopping(&self) -> bool {
        self.slot().stopping
    }

    /// Runs `f` on the live worker handle.
    pub(super) fn with_process<T, F>(&self, f: F) -> Result<T, CommandError>
    where
        F: FnOnce(&mut CommandOSStarted) -> Result<T, CommandError>,
    {
        self.slot()
            .process
            .as_mut()
            .ok_or(CommandError::NotSpawned)
            .and_then(f)
    }

    /// Flags the loop to stop and asks a still running worker to terminate.
    pub(super) fn request_stop(&self) {
        let account_id = self.account_id;
        let mut slot = self.slot();
        slot.stopping = true;

        let Some(process) = slot.process.as_mut() else {
            return;
        };
        if process.is_running() {
            debug!(%account_id, pid = process.get_pid(), "Terminating worker");
            if let Err(err) = process.terminate() {
                warn!(%account_id, "Terminating worker: {err}");
            }
        }
    }

    /// Forcefully kills a still running worker.
    pub(super) fn kill_live_process(&self) {
        let account_id = self.account_id;
        let mut slot = self.slot();

        let Some(process) = slot.process.as_mut() else {
            return;
        };
        if process.is_running() {
            warn!(%account_id, pid = process.get_pid(), "Killing worker");
            if let Err(err) = process.kill_and_wait() {
                warn!(%account_id, "Killing worker: {err}");
            }
        }
    }
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
    use super::*;
    use crate::command::command_os::CommandOSNotStarted;
    use crate::command::worker::WorkerCommand;
    use assert_matches::assert_matches;

    fn sleeper() -> CommandOSStarted {
        let worker = WorkerCommand::new("sh", std::env::temp_dir())
            .with_args(vec!["-c".to_string(), "exec sleep 30".to_string()]);
        CommandOSNotStarted::new(AccountID::new(10001).unwrap(), &worker)
            .start()
            .unwrap()
    }

    #[test]
    fn hold_keeps_worker_and_returns_output() {
        let mut slot = ProcessSlot::default();

        assert!(slot.hold(sleeper()).is_ok());

        let process = slot.process.as_mut().unwrap();
        assert!(process.is_running());
        process.kill_and_wait().unwrap();
    }

    #[test]
    fn hold_kills_worker_without_output() {
        let mut slot = ProcessSlot::default();
        let mut started = sleeper();
        let _output = started.take_output().unwrap();

        assert_matches!(slot.hold(started), Err(CommandError::StreamPipeError(_)));

        let process = slot.process.as_mut().unwrap();
        assert_eq!(process.exit_code().unwrap(), Some(-9));
    }
}
