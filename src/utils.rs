pub mod thread_context;
pub mod threads;
