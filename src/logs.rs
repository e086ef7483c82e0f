//! Worker output handling: line grammar, listener fan-out and console forwarding.
pub mod console;
pub mod dispatcher;
pub mod listener;
pub mod record;

pub use listener::{ListenerError, ListenerRegistry, LogListener};
pub use record::{LogRecord, RecordLevel};
