pub mod cancellation;
pub mod channel;
