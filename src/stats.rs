use crate::executor::Executed;
use core::time::Duration;
use std::sync::atomic::{AtomicU64, Ordering};

const UNTIMED: u64 = u64::MAX;

/// Wall-clock execution time of one task, written once when it finishes.
#[derive(Debug)]
pub(crate) struct ExecTime(AtomicU64);

impl Default for ExecTime {
    fn default() -> Self {
        Self(AtomicU64::new(UNTIMED))
    }
}

impl ExecTime {
    pub(crate) fn record(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(UNTIMED - 1);
        self.0.store(nanos.min(UNTIMED - 1), Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> Option<Duration> {
        match self.0.load(Ordering::Relaxed) {
            UNTIMED => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }
}

/// Counters shared by the workers of one scheduler.
#[derive(Debug)]
pub(crate) struct SchedulerStats {
    spawned: AtomicU64,
    dags_submitted: AtomicU64,
    executed: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    propagated: AtomicU64,
    steals: AtomicU64,
    failed_steals: AtomicU64,
    interrupts: AtomicU64,
    checkpoints: AtomicU64,
    busy_nanos: AtomicU64,
    /// Executions per worker.
    per_worker: Box<[AtomicU64]>,
}

impl SchedulerStats {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            spawned: AtomicU64::new(0),
            dags_submitted: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            propagated: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            failed_steals: AtomicU64::new(0),
            interrupts: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),
            busy_nanos: AtomicU64::new(0),
            per_worker: (0..workers.max(1)).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub(crate) fn record_spawn(&self) {
        self.spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dag(&self) {
        self.dags_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_executed(&self, worker: usize, executed: Executed) {
        let elapsed = match executed {
            Executed::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Executed::Completed { elapsed } => elapsed,
            Executed::Failed {
                propagated,
                elapsed,
            } => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                self.propagated
                    .fetch_add(propagated as u64, Ordering::Relaxed);
                elapsed
            }
        };
        self.executed.fetch_add(1, Ordering::Relaxed);
        self.busy_nanos.fetch_add(
            u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
        if let Some(counter) = self.per_worker.get(worker) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_steal(&self) {
        self.steals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_steal(&self) {
        self.failed_steals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            spawned: load(&self.spawned),
            dags_submitted: load(&self.dags_submitted),
            executed: load(&self.executed),
            skipped: load(&self.skipped),
            failed: load(&self.failed),
            propagated: load(&self.propagated),
            steals: load(&self.steals),
            failed_steals: load(&self.failed_steals),
            interrupts: load(&self.interrupts),
            checkpoints: load(&self.checkpoints),
            busy: Duration::from_nanos(load(&self.busy_nanos)),
            per_worker: self.per_worker.iter().map(load).collect(),
        }
    }
}

/// Point-in-time copy of a scheduler's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Ad-hoc tasks created with `spawn`.
    pub spawned: u64,
    /// Graphs submitted with `submit_dag` or `run_dag`.
    pub dags_submitted: u64,
    /// Task executions, successful or not.
    pub executed: u64,
    /// Dispatched jobs that found their task already claimed or failed
    /// upstream.
    pub skipped: u64,
    /// Task executions that failed.
    pub failed: u64,
    /// Nodes marked failed without running because an ancestor failed.
    pub propagated: u64,
    /// Jobs taken from another worker's deque.
    pub steals: u64,
    /// Rounds in which an idle worker found nothing to steal.
    pub failed_steals: u64,
    /// Interrupts observed at dispatch checkpoints.
    pub interrupts: u64,
    /// Interrupt checks performed, whether or not one was pending.
    pub checkpoints: u64,
    /// Summed wall-clock time spent inside task closures.
    pub busy: Duration,
    /// Executions per worker, indexed by worker. A single entry for the
    /// cooperative scheduler.
    pub per_worker: Vec<u64>,
}

impl StatsSnapshot {
    /// Ratio of the busiest worker's executions to the mean, `1.0` for a
    /// perfectly balanced run. `None` before anything ran.
    #[must_use]
    pub fn imbalance(&self) -> Option<f64> {
        let total: u64 = self.per_worker.iter().sum();
        let busiest = self.per_worker.iter().copied().max()?;
        (total > 0).then(|| busiest as f64 * self.per_worker.len() as f64 / total as f64)
    }
}
