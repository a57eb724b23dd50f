//! Dispatch fan-out: drives request/response rounds against every eligible
//! worker in parallel, sized by each worker's load controller.
//!
//! Work is claimed from a shared remaining counter, so a failed worker's
//! unfinished share flows back into the pool and is picked up by whoever is
//! still standing.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use futures::future::{BoxFuture, join_all};
use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use wire::{
    BatchAssignment, BatchOutcome, Command, EndpointDescriptor, FrameReceiver, FrameSender,
    Serializer, SimulationRequest,
};

use crate::dispatch::ModelStore;
use crate::registry::{FleetRegistry, WorkerCell};

/// Transport seam for one master-to-worker round. Abstract so the round
/// logic is testable without sockets.
pub trait WorkerLink: Send + Sync {
    /// Runs one batch on `endpoint` and resolves with the worker's outcome.
    fn run_batch<'a>(
        &'a self,
        endpoint: &'a EndpointDescriptor,
        assignment: BatchAssignment,
    ) -> BoxFuture<'a, io::Result<BatchOutcome>>;
}

/// What a whole dispatch accomplished.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub completed: u64,
    pub results: Vec<serde_json::Value>,
}

/// Partitions `request.replicas` across all eligible workers and iterates
/// rounds until the count is exhausted or no eligible workers remain.
///
/// A round that errors or exceeds the worker's hard deadline marks only that
/// worker timed out; its claim returns to the pool. Workers reactivated by
/// discovery mid-dispatch join the next pass.
pub async fn distribute(
    registry: &Arc<FleetRegistry>,
    link: &dyn WorkerLink,
    request: &SimulationRequest,
) -> DispatchOutcome {
    let remaining = AtomicU64::new(request.replicas);
    let completed = AtomicU64::new(0);
    let results = Mutex::new(Vec::new());

    while remaining.load(Ordering::Acquire) > 0 {
        let eligible = registry.eligible_workers();
        if eligible.is_empty() {
            warn!(
                "no eligible workers, abandoning dispatch with {} of {} replicas left",
                remaining.load(Ordering::Acquire),
                request.replicas,
            );
            break;
        }

        debug!("fan-out pass over {} workers", eligible.len());
        let rounds = eligible.into_iter().map(|(endpoint, cell)| {
            worker_rounds(
                registry, link, request, endpoint, cell, &remaining, &completed, &results,
            )
        });
        join_all(rounds).await;
    }

    DispatchOutcome {
        completed: completed.load(Ordering::Acquire),
        results: results.into_inner(),
    }
}

/// One worker's round loop: claim a batch, run it under the hard deadline,
/// feed the controller, repeat until the pool drains or the worker fails.
#[allow(clippy::too_many_arguments)]
async fn worker_rounds(
    registry: &Arc<FleetRegistry>,
    link: &dyn WorkerLink,
    request: &SimulationRequest,
    endpoint: EndpointDescriptor,
    cell: WorkerCell,
    remaining: &AtomicU64,
    completed: &AtomicU64,
    results: &Mutex<Vec<serde_json::Value>>,
) {
    loop {
        let tasks = claim_batch(&cell, remaining);
        if tasks == 0 {
            return;
        }

        let assignment = BatchAssignment {
            request: request.clone(),
            tasks,
        };
        let deadline = cell.lock().timeout();

        registry.increment_running();
        cell.lock().set_running(true);
        let started = Instant::now();
        let round = tokio::time::timeout(deadline, link.run_batch(&endpoint, assignment)).await;
        let elapsed = started.elapsed();
        cell.lock().set_running(false);
        registry.decrement_running();

        match round {
            Ok(Ok(outcome)) => {
                cell.lock().update(elapsed, tasks);
                completed.fetch_add(u64::from(tasks), Ordering::AcqRel);
                debug!("worker {endpoint} finished {tasks} tasks in {elapsed:?}");
                if !outcome.payload.is_null() {
                    results.lock().push(outcome.payload);
                }
            }
            Ok(Err(e)) => {
                warn!("round of {tasks} tasks on worker {endpoint} failed: {e}");
                fail_round(&cell, remaining, tasks);
                return;
            }
            Err(_) => {
                warn!("round of {tasks} tasks on worker {endpoint} exceeded {deadline:?}");
                fail_round(&cell, remaining, tasks);
                return;
            }
        }
    }
}

/// Claims up to the worker's current window from the remaining pool.
/// Returns 0 once the pool is empty.
fn claim_batch(cell: &WorkerCell, remaining: &AtomicU64) -> u32 {
    let want = {
        let state = cell.lock();
        let mut tasks = state.expected_tasks();
        if !state.can_complete(tasks) {
            // Oversized for the admission ceiling: halve once, as the
            // original window logic does, rather than refusing the worker.
            tasks = (tasks / 2).max(1);
        }
        u64::from(tasks)
    };

    let mut current = remaining.load(Ordering::Acquire);
    loop {
        if current == 0 {
            return 0;
        }
        let take = want.min(current);
        match remaining.compare_exchange(
            current,
            current - take,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return take as u32,
            Err(observed) => current = observed,
        }
    }
}

/// Timed-out or errored round: exclude the worker until discovery
/// reactivates it, shrink its window, and give the claim back.
fn fail_round(cell: &WorkerCell, remaining: &AtomicU64, tasks: u32) {
    {
        let mut state = cell.lock();
        state.mark_timed_out();
        state.force_shrink();
    }
    remaining.fetch_add(u64::from(tasks), Ordering::AcqRel);
}

type NetRx = FrameReceiver<OwnedReadHalf>;
type NetTx = FrameSender<OwnedWriteHalf>;

struct WorkerConn {
    rx: NetRx,
    tx: NetTx,
}

/// The production [`WorkerLink`]: framed TCP connections to workers, one
/// cached connection per endpoint, model bytes pushed on first contact.
pub struct TcpWorkerLink {
    serializer: Serializer,
    models: Arc<ModelStore>,
    conns: tokio::sync::Mutex<HashMap<EndpointDescriptor, WorkerConn>>,
}

impl TcpWorkerLink {
    pub fn new(serializer: Serializer, models: Arc<ModelStore>) -> Self {
        Self {
            serializer,
            models,
            conns: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Takes the cached connection for `endpoint` or dials a fresh one,
    /// sending the model definition on a fresh connection.
    async fn checkout(&self, endpoint: &EndpointDescriptor, model: &str) -> io::Result<WorkerConn> {
        if let Some(conn) = self.conns.lock().await.remove(endpoint) {
            return Ok(conn);
        }

        let (rx, mut tx) = wire::connect(endpoint, self.serializer).await?;
        if let Some(bytes) = self.models.get(model) {
            tx.send(&Command::Init).await?;
            tx.send(&model).await?;
            tx.send_bytes(&bytes).await?;
            info!("sent model {model} to worker {endpoint}");
        }
        Ok(WorkerConn { rx, tx })
    }

    async fn exchange(
        conn: &mut WorkerConn,
        assignment: &BatchAssignment,
    ) -> io::Result<BatchOutcome> {
        conn.tx.send(&Command::Data).await?;
        conn.tx.send(assignment).await?;
        conn.rx.recv().await
    }
}

impl WorkerLink for TcpWorkerLink {
    fn run_batch<'a>(
        &'a self,
        endpoint: &'a EndpointDescriptor,
        assignment: BatchAssignment,
    ) -> BoxFuture<'a, io::Result<BatchOutcome>> {
        Box::pin(async move {
            let mut conn = self.checkout(endpoint, &assignment.request.model).await?;
            let outcome = Self::exchange(&mut conn, &assignment).await?;
            // Only a connection that finished its round cleanly goes back in
            // the cache; abandoned rounds drop theirs mid-exchange.
            self.conns.lock().await.insert(*endpoint, conn);
            Ok(outcome)
        })
    }
}
