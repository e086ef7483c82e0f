//! Per-account supervision of one worker process.
pub mod error;
mod restart_loop;
mod shared;

use crate::account_id::AccountID;
use crate::command::restart_policy::RestartPolicy;
use crate::command::worker::WorkerCommand;
use crate::config::SupervisorConfig;
use crate::defaults::LOG_RECORD_CHANNEL_CAPACITY;
use crate::event::cancellation::CancellationMessage;
use crate::event::channel::EventConsumer;
use crate::logs::console::ConsoleForwarder;
use crate::logs::dispatcher::spawn_dispatcher;
use crate::logs::listener::{ListenerRegistry, LogListener};
use crate::status::{ProcessProbe, StatusProber, StatusSnapshot};
use crate::utils::thread_context::{
    NotStartedThreadContext, StartedThreadContext, ThreadContextStopperError,
};
use error::SupervisorError;
use restart_loop::RestartLoop;
use shared::SharedState;
use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{dispatcher, info, warn, Dispatch};

/// Lifecycle of a [`Supervisor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Never started.
    Idle,
    Starting,
    Running,
    /// Pausing before launching the worker again.
    Restarting,
    /// Terminal, reached by an explicit stop or an exhausted restart budget.
    Stopped,
}

impl Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::Restarting => "restarting",
            SupervisorState::Stopped => "stopped",
        };
        f.write_str(state)
    }
}

/// Keeps one worker process alive for an account and fans its output out to listeners.
///
/// The worker runs under a dedicated thread that reads its output line by line; records are
/// handed to listeners on the async `runtime` the supervisor was built with.
pub struct Supervisor {
    account_id: AccountID,
    worker: WorkerCommand,
    config: SupervisorConfig,
    runtime: Handle,
    registry: Arc<ListenerRegistry>,
    shared: Arc<SharedState>,
    prober: Mutex<StatusProber>,
    thread_context: Mutex<Option<StartedThreadContext>>,
}

impl Supervisor {
    pub fn new(
        account_id: AccountID,
        worker: WorkerCommand,
        config: SupervisorConfig,
        runtime: Handle,
    ) -> Self {
        let registry = Arc::new(ListenerRegistry::new(account_id, runtime.clone()));
        if config.forward_logs_to_console {
            registry.listen(Arc::new(ConsoleForwarder::new(account_id)));
        }

        Self {
            account_id,
            worker,
            config,
            runtime,
            registry,
            shared: Arc::new(SharedState::new(account_id)),
            prober: Mutex::default(),
            thread_context: Mutex::default(),
        }
    }

    /// Replaces the probe used to read the OS process table.
    pub fn with_probe<P>(mut self, probe: P) -> Self
    where
        P: ProcessProbe + 'static,
    {
        self.prober = Mutex::new(StatusProber::new(probe));
        self
    }

    pub fn account_id(&self) -> AccountID {
        self.account_id
    }

    pub fn lifecycle(&self) -> SupervisorState {
        self.shared.lifecycle()
    }

    pub fn restarts(&self) -> usize {
        self.shared.totals().restarts
    }

    pub fn total_logs(&self) -> u64 {
        self.shared.totals().total_logs
    }

    /// Registers a listener for the worker's records. Registering the same `Arc` twice keeps a
    /// single registration.
    pub fn listen<L>(&self, listener: Arc<L>) -> Arc<L>
    where
        L: LogListener + 'static,
    {
        self.registry.listen(listener)
    }

    /// Launches the worker and its restart loop. A supervisor can only be started once.
    pub fn start(&self) -> Result<(), SupervisorError> {
        let mut thread_context = lock(&self.thread_context);
        if thread_context.is_some() || self.lifecycle() != SupervisorState::Idle {
            return Err(SupervisorError::AlreadyStarted);
        }

        info!(account_id = %self.account_id, "Starting supervisor");
        self.shared.set_lifecycle(SupervisorState::Starting);
        let started = self.start_restart_thread().inspect_err(|_| {
            self.shared.set_lifecycle(SupervisorState::Idle);
        })?;
        *thread_context = Some(started);
        Ok(())
    }

    fn start_restart_thread(&self) -> Result<StartedThreadContext, SupervisorError> {
        let (records, _) = spawn_dispatcher(
            self.registry.clone(),
            &self.runtime,
            LOG_RECORD_CHANNEL_CAPACITY,
        );
        let restart_loop = RestartLoop {
            account_id: self.account_id,
            worker: self.worker.clone(),
            restart_policy: RestartPolicy::from(&self.config),
            kill_timeout: self.config.kill_timeout,
            ready_marker: self.config.ready_marker.clone(),
            shared: self.shared.clone(),
            records,
        };

        let dispatch = dispatcher::get_default(|d: &Dispatch| d.clone());
        let span = tracing::Span::current();

        let callback = move |stop_consumer: EventConsumer<CancellationMessage>| {
            let _guard = dispatcher::set_default(&dispatch);
            let _enter = span.enter();

            restart_loop.run(stop_consumer);
        };

        NotStartedThreadContext::new(format!("{}-supervisor", self.account_id), callback)
            .start()
            .map_err(SupervisorError::ThreadSpawn)
    }

    /// Stops the restart loop and terminates the worker, waiting up to the configured stop
    /// timeout for the loop to finish.
    ///
    /// If the loop outlives the timeout a still running worker is killed, the loop thread is
    /// left detached and [`SupervisorError::StopTimeout`] is returned. Stopping a supervisor
    /// that is not running is a no-op.
    ///
    /// This call blocks the current thread. Inside the async runtime use
    /// [`Supervisor::shutdown`] instead, otherwise the records the worker prints while
    /// stopping may never be dispatched.
    pub fn stop(&self) -> Result<(), SupervisorError> {
        let Some(thread_context) = lock(&self.thread_context).take() else {
            return Ok(());
        };
        stop_restart_thread(
            self.account_id,
            &self.shared,
            thread_context,
            self.config.stop_timeout,
        )
    }

    /// Async counterpart of [`Supervisor::stop`]. The wait for the restart loop runs on a
    /// blocking thread of the runtime, so the runtime keeps dispatching records meanwhile.
    pub async fn shutdown(&self) -> Result<(), SupervisorError> {
        let Some(thread_context) = lock(&self.thread_context).take() else {
            return Ok(());
        };
        let account_id = self.account_id;
        let shared = self.shared.clone();
        let stop_timeout = self.config.stop_timeout;
        let dispatch = dispatcher::get_default(|d: &Dispatch| d.clone());

        self.runtime
            .spawn_blocking(move || {
                dispatcher::with_default(&dispatch, || {
                    stop_restart_thread(account_id, &shared, thread_context, stop_timeout)
                })
            })
            .await?
    }

    /// Snapshot of the latest worker process.
    pub fn status(&self) -> Result<StatusSnapshot, SupervisorError> {
        let totals = self.shared.totals();
        let mut slot = self.shared.slot();
        let process = slot.process.as_mut().ok_or(SupervisorError::NotStarted)?;
        let pid = process.get_pid();
        let mut prober = lock(&self.prober);

        match process.exit_code()? {
            None => Ok(prober.running(pid, totals)?),
            Some(exit_code) => Ok(prober.stopped(pid, exit_code, totals)),
        }
    }
}

impl Drop for Supervisor {
    /// Requests the loop to stop and terminates the worker without waiting for either.
    fn drop(&mut self) {
        let thread_context = self
            .thread_context
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(thread_context) = thread_context {
            self.shared.request_stop();
            if let Err(err) = thread_context.cancel() {
                warn!(account_id = %self.account_id, "Stopping supervisor on drop: {err}");
            }
        }
    }
}

fn stop_restart_thread(
    account_id: AccountID,
    shared: &SharedState,
    thread_context: StartedThreadContext,
    stop_timeout: Duration,
) -> Result<(), SupervisorError> {
    info!(%account_id, "Stopping supervisor");
    shared.request_stop();
    thread_context.cancel()?;

    match thread_context.join_with_timeout(stop_timeout) {
        Ok(()) => {
            info!(%account_id, "Supervisor stopped");
            Ok(())
        }
        Err(ThreadContextStopperError::StopTimeout(thread_name)) => {
            warn!(%account_id, "Supervisor did not stop within {stop_timeout:?}");
            shared.kill_live_process();
            Err(SupervisorError::StopTimeout(thread_name))
        }
        Err(err) => Err(err.into()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
