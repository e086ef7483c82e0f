pub mod command_os;
pub mod error;
pub mod restart_policy;
pub mod worker;
