use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("could not spawn worker: {0}")]
    SpawnError(#[source] std::io::Error),

    #[error("{0} not piped")]
    StreamPipeError(String),

    #[error("worker process has not been spawned")]
    NotSpawned,

    #[error("{0}")]
    IOError(#[from] std::io::Error),
}
