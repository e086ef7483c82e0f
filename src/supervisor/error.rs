use crate::command::error::CommandError;
use crate::status::StatusError;
use crate::utils::thread_context::ThreadContextStopperError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("worker has not been started yet")]
    NotStarted,

    #[error("supervisor was already started")]
    AlreadyStarted,

    #[error("spawning supervisor thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    #[error("`{0}`")]
    Command(#[from] CommandError),

    #[error("`{0}`")]
    Status(#[from] StatusError),

    #[error("timed out waiting for `{0}` to stop")]
    StopTimeout(String),

    #[error("`{0}`")]
    ThreadContext(#[from] ThreadContextStopperError),

    #[error("waiting for the supervisor to stop: {0}")]
    StopTask(#[from] tokio::task::JoinError),
}
