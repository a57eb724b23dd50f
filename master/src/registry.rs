//! The authoritative map of known workers.
//!
//! One instance per master process, shared by the discovery handlers, the
//! dispatch rounds, and the monitoring pump. The registry lock covers the
//! map and the running count; each worker's load state sits in its own cell
//! so a round in flight never holds the registry lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;
use wire::{EndpointDescriptor, FleetSnapshot};

use crate::events::{ChangeNotifier, RegistryChange};
use crate::load::WorkerLoadState;

/// Shared handle to one worker's load controller.
pub type WorkerCell = Arc<Mutex<WorkerLoadState>>;

struct Inner {
    workers: HashMap<EndpointDescriptor, WorkerCell>,
    running_workers: u32,
}

/// Authoritative, thread-safe worker map with run-count accounting.
///
/// Every mutating operation publishes a change event; delivery is
/// best-effort and never blocks the mutation.
pub struct FleetRegistry {
    label: Arc<str>,
    self_endpoint: EndpointDescriptor,
    notifier: ChangeNotifier,
    inner: Mutex<Inner>,
}

impl FleetRegistry {
    /// Creates a registry plus the change-event stream for the monitoring
    /// fan-out.
    pub fn new(
        label: &str,
        self_endpoint: EndpointDescriptor,
    ) -> (Arc<Self>, UnboundedReceiver<RegistryChange>) {
        let label: Arc<str> = Arc::from(label);
        let (notifier, events) = ChangeNotifier::new(Arc::clone(&label));
        let registry = Arc::new(Self {
            label,
            self_endpoint,
            notifier,
            inner: Mutex::new(Inner {
                workers: HashMap::new(),
                running_workers: 0,
            }),
        });
        (registry, events)
    }

    /// A registry with no change-event consumer.
    pub fn detached(label: &str, self_endpoint: EndpointDescriptor) -> Arc<Self> {
        let label: Arc<str> = Arc::from(label);
        Arc::new(Self {
            notifier: ChangeNotifier::disabled(Arc::clone(&label)),
            label,
            self_endpoint,
            inner: Mutex::new(Inner {
                workers: HashMap::new(),
                running_workers: 0,
            }),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn self_endpoint(&self) -> EndpointDescriptor {
        self.self_endpoint
    }

    /// Registers a worker endpoint.
    ///
    /// Idempotent: a healthy known endpoint is a silent no-op. A known but
    /// timed-out or removed endpoint is reactivated, since re-announcement
    /// through discovery means the worker is reachable again.
    ///
    /// Returns whether anything changed.
    pub fn add_worker(&self, endpoint: EndpointDescriptor) -> bool {
        let mut inner = self.inner.lock();
        if let Some(cell) = inner.workers.get(&endpoint) {
            let mut state = cell.lock();
            if state.eligible() {
                return false;
            }
            state.reactivate();
            return true;
        }

        let state = WorkerLoadState::new(self.notifier.clone());
        inner
            .workers
            .insert(endpoint, Arc::new(Mutex::new(state)));
        drop(inner);

        self.notifier.notify();
        true
    }

    /// Unregisters a worker, marking its state removed for any round still
    /// holding the cell.
    pub fn remove_worker(&self, endpoint: &EndpointDescriptor) -> bool {
        let removed = self.inner.lock().workers.remove(endpoint);
        match removed {
            Some(cell) => {
                cell.lock().mark_removed();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, endpoint: &EndpointDescriptor) -> Option<WorkerCell> {
        self.inner.lock().workers.get(endpoint).map(Arc::clone)
    }

    /// Workers that may receive new dispatch rounds: neither removed nor
    /// timed out. Sorted by endpoint for deterministic fan-out order.
    pub fn eligible_workers(&self) -> Vec<(EndpointDescriptor, WorkerCell)> {
        let inner = self.inner.lock();
        let mut workers: Vec<_> = inner
            .workers
            .iter()
            .filter(|(_, cell)| cell.lock().eligible())
            .map(|(endpoint, cell)| (*endpoint, Arc::clone(cell)))
            .collect();
        drop(inner);

        workers.sort_by_key(|(endpoint, _)| *endpoint);
        workers
    }

    pub fn worker_count(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn increment_running(&self) {
        self.inner.lock().running_workers += 1;
        self.notifier.notify();
    }

    pub fn decrement_running(&self) {
        let mut inner = self.inner.lock();
        inner.running_workers = inner.running_workers.saturating_sub(1);
        drop(inner);
        self.notifier.notify();
    }

    /// Copies the registry under lock into an immutable snapshot. Readers of
    /// the snapshot never observe a half-applied mutation.
    pub fn snapshot(&self) -> FleetSnapshot {
        let inner = self.inner.lock();
        let mut workers: Vec<_> = inner
            .workers
            .iter()
            .map(|(endpoint, cell)| (*endpoint, cell.lock().report()))
            .collect();
        let running_workers = inner.running_workers;
        drop(inner);

        workers.sort_by_key(|(endpoint, _)| *endpoint);
        FleetSnapshot {
            label: self.label.to_string(),
            running_workers,
            workers,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use super::*;

    fn endpoint(port: u16) -> EndpointDescriptor {
        EndpointDescriptor::tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn registration_is_idempotent_with_one_notification() {
        let (registry, mut events) = FleetRegistry::new("fleet", endpoint(10001));

        assert!(registry.add_worker(endpoint(9000)));
        assert!(!registry.add_worker(endpoint(9000)));

        assert_eq!(registry.worker_count(), 1);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn readd_reactivates_timed_out_worker() {
        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        registry.add_worker(endpoint(9000));

        registry
            .get(&endpoint(9000))
            .unwrap()
            .lock()
            .mark_timed_out();
        assert!(registry.eligible_workers().is_empty());

        assert!(registry.add_worker(endpoint(9000)));
        assert_eq!(registry.eligible_workers().len(), 1);
        assert_eq!(registry.worker_count(), 1);
    }

    #[test]
    fn remove_marks_state_removed() {
        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        registry.add_worker(endpoint(9000));
        let cell = registry.get(&endpoint(9000)).unwrap();

        assert!(registry.remove_worker(&endpoint(9000)));
        assert!(cell.lock().is_removed());
        assert_eq!(registry.worker_count(), 0);
        assert!(!registry.remove_worker(&endpoint(9000)));
    }

    #[test]
    fn running_count_saturates_at_zero() {
        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        registry.increment_running();
        registry.decrement_running();
        registry.decrement_running();
        assert_eq!(registry.snapshot().running_workers, 0);
    }

    #[test]
    fn snapshot_sees_consistent_entries_under_mutation() {
        let registry = FleetRegistry::detached("fleet", endpoint(10001));
        for port in 0..8 {
            registry.add_worker(endpoint(9000 + port));
        }

        let mutator = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for round in 0..500u32 {
                    let target = endpoint(9000 + (round % 8) as u16);
                    let cell = registry.get(&target).unwrap();
                    let mut state = cell.lock();
                    state.update(Duration::from_millis(10), 4);
                    if round % 7 == 0 {
                        state.mark_timed_out();
                        state.reactivate();
                    }
                }
            })
        };

        for _ in 0..200 {
            let snapshot = registry.snapshot();
            assert_eq!(snapshot.workers.len(), 8);
            for (_, report) in &snapshot.workers {
                // Each entry is read under its own lock: flags cleared by
                // reactivate can never be observed half-applied, and the
                // window floor holds.
                assert!(report.expected_tasks >= 1);
                assert!(!report.removed);
            }
        }

        mutator.join().unwrap();
    }
}
