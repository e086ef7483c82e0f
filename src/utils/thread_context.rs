use std::{
    io,
    thread::{sleep, JoinHandle},
    time::{Duration, Instant},
};

use crate::{
    event::{
        cancellation::CancellationMessage,
        channel::{pub_sub, EventConsumer, EventPublisher},
    },
    utils::threads::spawn_named_thread,
};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct NotStartedThreadContext<F>
where
    F: FnOnce(EventConsumer<CancellationMessage>) + Send + 'static,
{
    thread_name: String,
    callback: F,
}

impl<F> NotStartedThreadContext<F>
where
    F: FnOnce(EventConsumer<CancellationMessage>) + Send + 'static,
{
    pub fn new<S: Into<String>>(thread_name: S, callback: F) -> Self {
        Self {
            thread_name: thread_name.into(),
            callback,
        }
    }

    /// Spawns the dedicated thread. The callback receives the consumer side of the
    /// cancellation channel and is expected to return once it observes a cancellation.
    pub fn start(self) -> io::Result<StartedThreadContext> {
        let (stop_publisher, stop_consumer) = pub_sub::<CancellationMessage>();
        let callback = self.callback;
        let join_handle = spawn_named_thread(&self.thread_name, move || callback(stop_consumer))?;

        Ok(StartedThreadContext {
            thread_name: self.thread_name,
            stop_publisher,
            join_handle,
        })
    }
}

pub struct StartedThreadContext {
    thread_name: String,
    stop_publisher: EventPublisher<CancellationMessage>,
    join_handle: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThreadContextStopperError {
    #[error("Error sending stop signal to '{0}' thread: {1}")]
    EventPublisherError(String, String),

    #[error("Error joining '{0}' thread: {1}")]
    JoinError(String, String),

    #[error("Timeout waiting for '{0}' thread to finish")]
    StopTimeout(String),
}

impl StartedThreadContext {
    pub fn is_thread_finished(&self) -> bool {
        self.join_handle.is_finished()
    }

    /// Publishes the cancellation message without waiting for the thread.
    ///
    /// A thread that already finished dropped its consumer, which is not an error here.
    pub fn cancel(&self) -> Result<(), ThreadContextStopperError> {
        match self.stop_publisher.publish(()) {
            Err(_) if self.is_thread_finished() => Ok(()),
            result => result.map_err(|err| {
                ThreadContextStopperError::EventPublisherError(
                    self.thread_name.clone(),
                    err.to_string(),
                )
            }),
        }
    }

    /// Periodically checks whether the thread has finished and joins it. Once `timeout`
    /// elapses the thread is left detached and [`ThreadContextStopperError::StopTimeout`] is
    /// returned.
    pub fn join_with_timeout(self, timeout: Duration) -> Result<(), ThreadContextStopperError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.join_handle.is_finished() {
                return self.join_handle.join().map_err(|err| {
                    ThreadContextStopperError::JoinError(
                        self.thread_name.clone(),
                        err.downcast_ref::<&str>()
                            .unwrap_or(&"Unknown error")
                            .to_string(),
                    )
                });
            }
            if Instant::now() >= deadline {
                return Err(ThreadContextStopperError::StopTimeout(self.thread_name));
            }
            sleep(JOIN_POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use crate::event::{cancellation::CancellationMessage, channel::EventConsumer};
    use crate::utils::thread_context::ThreadContextStopperError;

    use super::NotStartedThreadContext;

    #[test]
    fn test_thread_context_start_stop() {
        let thread_name = "test-thread";
        let callback = |stop_consumer: EventConsumer<CancellationMessage>| loop {
            if stop_consumer.is_cancelled_with_timeout(Duration::from_millis(10)) {
                break;
            }
        };

        let started_thread_context = NotStartedThreadContext::new(thread_name, callback)
            .start()
            .unwrap();
        assert!(!started_thread_context.is_thread_finished());
        started_thread_context.cancel().unwrap();
        started_thread_context
            .join_with_timeout(Duration::from_secs(1))
            .unwrap();
    }

    #[test]
    fn test_cancel_finished_thread() {
        let started_thread_context =
            NotStartedThreadContext::new("short-lived", |_: EventConsumer<CancellationMessage>| {})
                .start()
                .unwrap();
        while !started_thread_context.is_thread_finished() {
            sleep(Duration::from_millis(5));
        }

        assert!(started_thread_context.cancel().is_ok());
        assert!(started_thread_context
            .join_with_timeout(Duration::ZERO)
            .is_ok());
    }

    #[test]
    fn test_fail_stop() {
        let thread_name = "test-thread";
        let never_ending_fn = |_stop_consumer: EventConsumer<CancellationMessage>| {
            sleep(Duration::from_secs(u64::MAX));
        };
        let started_thread_context = NotStartedThreadContext::new(thread_name, never_ending_fn)
            .start()
            .unwrap();

        assert!(!started_thread_context.is_thread_finished());

        started_thread_context.cancel().unwrap();
        assert_eq!(
            started_thread_context
                .join_with_timeout(Duration::from_millis(200))
                .unwrap_err(),
            ThreadContextStopperError::StopTimeout(thread_name.to_string())
        );
    }
}
