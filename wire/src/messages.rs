//! Message shapes exchanged between clients, the master, workers, and
//! monitors. Everything the core does not need to read travels as an opaque
//! `serde_json::Value`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::EndpointDescriptor;

/// A client-submitted simulation request.
///
/// The core reads `model` and `replicas`; the deadline and the
/// parameter/sampling payload pass through untouched to the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub model: String,
    pub replicas: u64,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// One round's worth of work for a single worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchAssignment {
    pub request: SimulationRequest,
    pub tasks: u32,
}

/// A worker's reply to a [`BatchAssignment`].
///
/// `elapsed_ns` is the executor's own wall-clock measure; the load
/// controller is fed the master-side round-trip time instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub tasks: u32,
    pub elapsed_ns: u64,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Summary sent back to the client once a dispatch concludes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationReply {
    pub requested: u64,
    pub completed: u64,
    pub results: Vec<serde_json::Value>,
}

/// Serializable view of one worker's load-controller state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerLoadReport {
    pub expected_tasks: u32,
    pub estimated_rtt_ns: f64,
    pub dev_rtt_ns: f64,
    pub sample_rtt_ns: f64,
    pub running: bool,
    pub timed_out: bool,
    pub removed: bool,
}

/// An immutable copy of a fleet registry at a point in time, taken under
/// lock, suitable for cross-process transmission to monitors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub label: String,
    pub running_workers: u32,
    pub workers: Vec<(EndpointDescriptor, WorkerLoadReport)>,
}

/// The body of a `MonitorUpdate` push, keyed by registry label.
pub type SnapshotMap = BTreeMap<String, FleetSnapshot>;
