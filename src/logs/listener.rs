use super::record::LogRecord;
use crate::account_id::AccountID;
use crate::defaults::LISTENER_QUEUE_WARN_DEPTH;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::instrument::WithSubscriber;
use tracing::{error, warn, Instrument};

#[derive(Error, Debug, Clone, PartialEq)]
#[error("log listener failed: {0}")]
pub struct ListenerError(pub String);

/// Observer notified of every record a supervised worker prints.
#[async_trait]
pub trait LogListener: Send + Sync {
    async fn on_log(&self, record: LogRecord) -> Result<(), ListenerError>;
}

#[async_trait]
impl<F, Fut> LogListener for F
where
    F: Fn(LogRecord) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    async fn on_log(&self, record: LogRecord) -> Result<(), ListenerError> {
        self(record).await
    }
}

struct Registration {
    listener: Arc<dyn LogListener>,
    queue: UnboundedSender<LogRecord>,
    depth: Arc<AtomicUsize>,
}

/// Set of listeners of one supervised worker.
///
/// Every registered listener owns a queue drained by its own task on `runtime`, so records
/// reach each listener in the order they were broadcast while a slow or failing listener
/// holds back nobody but itself.
///
/// Queues are unbounded: records pile up in memory for as long as a listener lags behind.
/// A warning is logged each time a queue grows past [`LISTENER_QUEUE_WARN_DEPTH`].
pub struct ListenerRegistry {
    account_id: AccountID,
    runtime: Handle,
    listeners: RwLock<Vec<Registration>>,
}

impl ListenerRegistry {
    pub fn new(account_id: AccountID, runtime: Handle) -> Self {
        Self {
            account_id,
            runtime,
            listeners: RwLock::default(),
        }
    }

    /// Registers `listener` and hands it back. Registering the same `Arc` again is a no-op.
    pub fn listen<L>(&self, listener: Arc<L>) -> Arc<L>
    where
        L: LogListener + 'static,
    {
        let as_dyn: Arc<dyn LogListener> = listener.clone();
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if listeners.iter().any(|registered| {
            std::ptr::addr_eq(Arc::as_ptr(&registered.listener), Arc::as_ptr(&as_dyn))
        }) {
            return listener;
        }

        let depth = Arc::new(AtomicUsize::new(0));
        let queue = self.spawn_drain(as_dyn.clone(), depth.clone());
        listeners.push(Registration {
            listener: as_dyn,
            queue,
            depth,
        });
        listener
    }

    fn spawn_drain(
        &self,
        listener: Arc<dyn LogListener>,
        depth: Arc<AtomicUsize>,
    ) -> UnboundedSender<LogRecord> {
        let (queue, mut pending) = unbounded_channel::<LogRecord>();
        let account_id = self.account_id;

        self.runtime.spawn(
            async move {
                while let Some(record) = pending.recv().await {
                    depth.fetch_sub(1, Ordering::Relaxed);
                    match AssertUnwindSafe(listener.on_log(record)).catch_unwind().await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => warn!(%account_id, "{err}"),
                        Err(_) => error!(%account_id, "log listener panicked"),
                    }
                }
            }
            .in_current_span()
            .with_current_subscriber(),
        );
        queue
    }

    /// Queues `record` for every listener registered at this point.
    pub fn broadcast(&self, record: &LogRecord) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        for registration in listeners.iter() {
            let depth = registration.depth.fetch_add(1, Ordering::Relaxed) + 1;
            // A closed queue means its drain task is gone along with the runtime.
            if registration.queue.send(record.clone()).is_err() {
                registration.depth.fetch_sub(1, Ordering::Relaxed);
                continue;
            }
            if depth == LISTENER_QUEUE_WARN_DEPTH {
                warn!(
                    account_id = %self.account_id,
                    "Log listener is falling behind, {depth} records queued"
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
