//! The worker process: advertises itself to masters over UDP and runs
//! simulation batches pushed to its TCP endpoints.

pub mod announce;
pub mod config;
pub mod error;
pub mod executor;
pub mod server;
