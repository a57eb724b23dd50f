//! Per-worker adaptive batch sizing.
//!
//! The controller reuses TCP's congestion-control discipline for workload
//! batching: slow-start doubling below a threshold, additive increase above
//! it, multiplicative decrease when a round misses its soft deadline, and
//! EWMA estimators for per-task round-trip time and its deviation.

use std::time::Duration;

use wire::WorkerLoadReport;

use crate::events::ChangeNotifier;

const ALPHA: f64 = 0.125;
const BETA: f64 = 0.25;
const SLOW_START_THRESHOLD: u32 = 256;

/// One hour, in nanoseconds. Batches whose soft deadline lands past this are
/// refused by the admission check.
const MAX_RUNNING_TIME_NS: f64 = 3_600_000_000_000.0;

/// Hard deadline granted to a worker we have no batch history for yet.
const SINGLE_TASK_TIMEOUT_NS: u64 = 1_000_000_000;

/// Adaptive load controller for a single remote worker.
///
/// Owned by the fleet registry entry for that worker; only the dispatch
/// round currently in flight to the worker mutates it, so each operation is
/// atomic with respect to concurrent snapshot reads. It never fails: bad
/// rounds only adjust state, and the caller decides what `timed_out` and
/// `removed` mean for dispatch.
#[derive(Debug)]
pub struct WorkerLoadState {
    expected_tasks: u32,
    estimated_rtt: f64,
    dev_rtt: f64,
    sample_rtt: f64,
    running: bool,
    timed_out: bool,
    removed: bool,
    notifier: ChangeNotifier,
}

impl WorkerLoadState {
    pub fn new(notifier: ChangeNotifier) -> Self {
        Self {
            expected_tasks: 1,
            estimated_rtt: 0.0,
            dev_rtt: 0.0,
            sample_rtt: 0.0,
            running: false,
            timed_out: false,
            removed: false,
            notifier,
        }
    }

    /// Revises the batch window after a completed round.
    ///
    /// # Arguments
    /// * `elapsed` - Master-side wall-clock time of the whole round.
    /// * `tasks_sent` - How many tasks the round carried.
    pub fn update(&mut self, elapsed: Duration, tasks_sent: u32) {
        let elapsed_ns = elapsed.as_nanos() as f64;

        if self.dev_rtt != 0.0 {
            if elapsed_ns >= self.time_limit_ns(self.expected_tasks) {
                // The batch was too large for the deadline.
                self.expected_tasks = (self.expected_tasks / 2).max(1);
            } else if self.expected_tasks < SLOW_START_THRESHOLD {
                self.expected_tasks *= 2;
            } else {
                self.expected_tasks += 1;
            }
        } else {
            self.expected_tasks = 2;
        }

        self.sample_rtt = elapsed_ns / f64::from(tasks_sent.max(1));

        if self.dev_rtt == 0.0 {
            // First measured round: seed the estimators from the sample.
            self.estimated_rtt = self.sample_rtt;
            self.dev_rtt = self.sample_rtt * 2.0;
        } else {
            self.estimated_rtt = ALPHA * self.sample_rtt + (1.0 - ALPHA) * self.estimated_rtt;
            self.dev_rtt =
                BETA * (self.sample_rtt - self.estimated_rtt).abs() + (1.0 - BETA) * self.dev_rtt;
        }

        self.notifier.notify();
    }

    /// Halves the batch window without a measured round. Used when a round
    /// times out instead of completing; the RTT estimators are left alone
    /// since the round produced no sample.
    pub fn force_shrink(&mut self) {
        self.expected_tasks = (self.expected_tasks / 2).max(1);
        self.notifier.notify();
    }

    pub fn mark_timed_out(&mut self) {
        self.timed_out = true;
        self.notifier.notify();
    }

    pub fn mark_removed(&mut self) {
        self.removed = true;
        self.notifier.notify();
    }

    /// Clears the `timed_out`/`removed` flags once the worker has announced
    /// itself again through discovery.
    pub fn reactivate(&mut self) {
        self.timed_out = false;
        self.removed = false;
        self.notifier.notify();
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Soft deadline for a batch of `tasks`: past it, the batch is straining
    /// this worker and the window shrinks on the next `update`.
    pub fn time_limit(&self, tasks: u32) -> Duration {
        Duration::from_nanos(self.time_limit_ns(tasks) as u64)
    }

    /// Hard deadline after which the in-flight round is abandoned. Uses a
    /// wider deviation margin (4x) than the soft limit (1x) on purpose:
    /// shrinking is cheap, abandoning a round is not.
    pub fn timeout(&self) -> Duration {
        if self.expected_tasks == 1 {
            return Duration::from_nanos(SINGLE_TASK_TIMEOUT_NS);
        }
        let tasks = f64::from(self.expected_tasks);
        let ns = tasks * self.estimated_rtt + tasks * 4.0 * self.dev_rtt;
        Duration::from_nanos(ns as u64)
    }

    /// Admission check before assigning an oversized batch.
    pub fn can_complete(&self, tasks: u32) -> bool {
        self.time_limit_ns(tasks) < MAX_RUNNING_TIME_NS
    }

    fn time_limit_ns(&self, tasks: u32) -> f64 {
        let tasks = f64::from(tasks);
        tasks * self.estimated_rtt + tasks * self.dev_rtt
    }

    pub fn expected_tasks(&self) -> u32 {
        self.expected_tasks
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    /// Whether new dispatch rounds may be sent to this worker.
    pub fn eligible(&self) -> bool {
        !self.timed_out && !self.removed
    }

    pub fn report(&self) -> WorkerLoadReport {
        WorkerLoadReport {
            expected_tasks: self.expected_tasks,
            estimated_rtt_ns: self.estimated_rtt,
            dev_rtt_ns: self.dev_rtt,
            sample_rtt_ns: self.sample_rtt,
            running: self.running,
            timed_out: self.timed_out,
            removed: self.removed,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_estimates(expected_tasks: u32, estimated_rtt: f64, dev_rtt: f64) -> Self {
        use std::sync::Arc;

        let mut state = Self::new(ChangeNotifier::disabled(Arc::from("test")));
        state.expected_tasks = expected_tasks;
        state.estimated_rtt = estimated_rtt;
        state.dev_rtt = dev_rtt;
        state
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const MS: f64 = 1_000_000.0;

    fn fresh() -> WorkerLoadState {
        WorkerLoadState::new(ChangeNotifier::disabled(Arc::from("test")))
    }

    #[test]
    fn first_round_seeds_estimates() {
        let mut state = fresh();
        state.update(Duration::from_millis(50), 2);

        assert_eq!(state.expected_tasks(), 2);
        assert_eq!(state.sample_rtt, 25.0 * MS);
        assert_eq!(state.estimated_rtt, 25.0 * MS);
        assert_eq!(state.dev_rtt, 50.0 * MS);
    }

    #[test]
    fn fast_second_round_doubles_window() {
        let mut state = fresh();
        state.update(Duration::from_millis(50), 2);

        // Well under time_limit(2) = 2*25ms + 2*50ms = 150ms.
        assert_eq!(state.time_limit(2), Duration::from_millis(150));
        state.update(Duration::from_millis(40), 2);
        assert_eq!(state.expected_tasks(), 4);
    }

    #[test]
    fn slow_start_doubles_then_grows_linearly() {
        let mut state = WorkerLoadState::with_estimates(64, MS, MS);
        for expected in [128, 256, 257, 258] {
            state.update(Duration::from_nanos(100), state.expected_tasks());
            assert_eq!(state.expected_tasks(), expected);
        }
    }

    #[test]
    fn missed_deadline_halves_window() {
        let mut state = WorkerLoadState::with_estimates(8, 10.0 * MS, 5.0 * MS);
        assert_eq!(state.time_limit(8), Duration::from_millis(120));

        state.update(Duration::from_millis(150), 8);
        assert_eq!(state.expected_tasks(), 4);
    }

    #[test]
    fn window_never_drops_below_one() {
        let mut state = WorkerLoadState::with_estimates(2, MS, MS);
        for _ in 0..5 {
            state.force_shrink();
            assert_eq!(state.expected_tasks(), 1);
        }

        state.update(Duration::from_secs(10), 1);
        assert_eq!(state.expected_tasks(), 1);
    }

    #[test]
    fn identical_samples_shrink_deviation_monotonically() {
        let mut state = fresh();
        state.update(Duration::from_millis(30), 2);

        let mut prev = state.dev_rtt;
        for _ in 0..5 {
            state.update(Duration::from_millis(30), 2);
            assert_eq!(state.estimated_rtt, 15.0 * MS);
            assert!(state.dev_rtt < prev);
            prev = state.dev_rtt;
        }
    }

    #[test]
    fn single_task_timeout_is_fixed() {
        let state = WorkerLoadState::with_estimates(1, 500.0 * MS, 500.0 * MS);
        assert_eq!(state.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn timeout_margin_is_wider_than_time_limit() {
        let state = WorkerLoadState::with_estimates(8, 10.0 * MS, 5.0 * MS);
        assert_eq!(state.time_limit(8), Duration::from_millis(120));
        assert_eq!(state.timeout(), Duration::from_millis(240));
    }

    #[test]
    fn admission_check_refuses_oversized_batches() {
        // 1s per task: 4000 tasks need more than the one hour ceiling.
        let state = WorkerLoadState::with_estimates(1, 500.0 * MS, 500.0 * MS);
        assert!(state.can_complete(3599));
        assert!(!state.can_complete(3600));
    }

    #[test]
    fn flags_toggle_and_reactivate() {
        let mut state = fresh();
        assert!(state.eligible());

        state.mark_timed_out();
        assert!(!state.eligible());
        state.mark_removed();
        assert!(state.is_timed_out() && state.is_removed());

        state.reactivate();
        assert!(state.eligible());
        assert!(!state.is_timed_out() && !state.is_removed());
    }

    #[tokio::test]
    async fn mutations_emit_change_events() {
        let (notifier, mut rx) = ChangeNotifier::new(Arc::from("fleet"));
        let mut state = WorkerLoadState::new(notifier);

        state.update(Duration::from_millis(10), 1);
        state.force_shrink();
        state.mark_timed_out();
        state.reactivate();

        for _ in 0..4 {
            let change = rx.try_recv().expect("missing change event");
            assert_eq!(&*change.label, "fleet");
        }
        assert!(rx.try_recv().is_err());
    }
}
