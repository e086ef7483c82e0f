use super::listener::ListenerRegistry;
use super::record::LogRecord;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{channel, Sender};
use tokio::task::JoinHandle;
use tracing::instrument::WithSubscriber;
use tracing::{trace, Instrument};

/// Blocking end of the queue between the output reader thread and the async dispatcher.
#[derive(Clone)]
pub struct RecordSender(Sender<LogRecord>);

impl RecordSender {
    /// Queues `record`, blocking while the queue is full. Returns `false` once the dispatcher
    /// is gone.
    ///
    /// Must not be called from an async context.
    pub fn send_blocking(&self, record: LogRecord) -> bool {
        self.0.blocking_send(record).is_ok()
    }
}

/// Spawns on `runtime` the task forwarding every queued record to the listeners in `registry`.
///
/// The task ends once every [`RecordSender`] has been dropped and the queue is drained.
pub fn spawn_dispatcher(
    registry: Arc<ListenerRegistry>,
    runtime: &Handle,
    capacity: usize,
) -> (RecordSender, JoinHandle<()>) {
    let (sender, mut queue) = channel::<LogRecord>(capacity);

    let handle = runtime.spawn(
        async move {
            while let Some(record) = queue.recv().await {
                registry.broadcast(&record);
            }
            trace!("log dispatcher finished");
        }
        .in_current_span()
        .with_current_subscriber(),
    );

    (RecordSender(sender), handle)
}
