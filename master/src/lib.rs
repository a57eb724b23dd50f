//! The coordinator process core: fleet discovery, adaptive task batching,
//! and monitoring fan-out.
//!
//! The discovery service populates the [`registry::FleetRegistry`]; the
//! dispatch server sizes work batches per worker through each worker's
//! [`load::WorkerLoadState`]; registry changes feed the
//! [`monitor::MonitorFanout`].

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod load;
pub mod monitor;
pub mod registry;
pub mod rounds;
