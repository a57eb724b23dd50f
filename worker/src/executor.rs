//! Batch execution behind the network surface.
//!
//! The server hands a whole batch to a [`SimulationExecutor`] on a blocking
//! thread and ships whatever payload comes back. The synthetic executor
//! stands in for a real simulation engine: it burns a jittered amount of CPU
//! time per replica, which is all the dispatch side's load controller ever
//! observes.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use wire::BatchAssignment;

/// A batch's result payload, opaque to everything but the client.
#[derive(Debug)]
pub struct ExecutorOutput {
    pub payload: serde_json::Value,
}

/// Runs one batch of replicas against a model definition.
///
/// Implementations run on a blocking thread; they may take as long as the
/// batch honestly costs.
pub trait SimulationExecutor: Send + Sync + 'static {
    fn run(&self, model: &Arc<Vec<u8>>, assignment: &BatchAssignment) -> ExecutorOutput;
}

/// Synthetic engine with a jittered per-replica cost.
pub struct SyntheticExecutor {
    task_cost: Duration,
    /// Relative jitter applied per replica, in `[0, 1)`.
    jitter: f64,
}

impl SyntheticExecutor {
    pub fn new(task_cost: Duration) -> Self {
        Self {
            task_cost,
            jitter: 0.5,
        }
    }
}

impl SimulationExecutor for SyntheticExecutor {
    fn run(&self, model: &Arc<Vec<u8>>, assignment: &BatchAssignment) -> ExecutorOutput {
        let mut rng = rand::rng();
        for _ in 0..assignment.tasks {
            let scale = 1.0 + self.jitter * (rng.random::<f64>() - 0.5);
            std::thread::sleep(self.task_cost.mul_f64(scale));
        }
        ExecutorOutput {
            payload: serde_json::json!({
                "model": assignment.request.model,
                "model_bytes": model.len(),
                "replicas": assignment.tasks,
            }),
        }
    }
}
