//! Supervision of one long-running worker process per account.
//!
//! A [`supervisor::Supervisor`] launches the worker, keeps it alive according to its restart
//! policy, parses the worker's combined output into [`logs::LogRecord`]s for the registered
//! listeners and reports [`status::StatusSnapshot`]s. [`directory::SupervisorDirectory`] keeps
//! the single supervisor of every account.
pub mod account_id;
pub mod command;
pub mod config;
pub mod defaults;
pub mod directory;
pub mod event;
pub mod logging;
pub mod logs;
pub mod status;
pub mod supervisor;
pub mod utils;
