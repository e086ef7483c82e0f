use crate::defaults::default_worker_args;
use std::{collections::HashMap, path::PathBuf};

/// How a worker process is launched: binary, arguments, environment and working directory.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerCommand {
    pub bin: PathBuf,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: PathBuf,
}

impl WorkerCommand {
    /// Worker launched with the fast-start argument only.
    pub fn new<B, W>(bin: B, working_dir: W) -> Self
    where
        B: Into<PathBuf>,
        W: Into<PathBuf>,
    {
        WorkerCommand {
            bin: bin.into(),
            args: default_worker_args(),
            env: HashMap::default(),
            working_dir: working_dir.into(),
        }
    }

    pub fn with_args(self, args: Vec<String>) -> Self {
        Self { args, ..self }
    }

    pub fn with_env(self, env: HashMap<String, String>) -> Self {
        Self { env, ..self }
    }
}
