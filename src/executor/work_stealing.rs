use crate::{
    config::{Config, SchedulerConfig},
    dag::Dag,
    error::{SchedulerError, SchedulerSetupError},
    executor::state::{DagRun, IdAllocator, Job, Registry, TaskCell, TaskRef},
    interrupt::{Interrupt, InterruptHandle},
    runtime::DagHandle,
    scheduler::{Scheduler, TaskResult},
    stats::{SchedulerStats, StatsSnapshot},
    task::{Task, TaskPriority, TaskState},
    types::TaskId,
    utils::victims,
};
use core::time::Duration;
use crossbeam_deque::{Injector, Steal, Stealer, Worker};
use derive_more::Debug;
use parking_lot::{Condvar, Mutex, RwLock};
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, info, trace, warn};

/// Wake-up channel between workers and awaiters.
///
/// Waiters read the epoch before looking for work and only sleep while it is
/// unchanged, so a notification sent in between is never lost.
#[derive(Debug, Default)]
struct Signal {
    epoch: Mutex<u64>,
    cond: Condvar,
}

impl Signal {
    fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    fn notify(&self) {
        {
            let mut epoch = self.epoch.lock();
            *epoch = epoch.wrapping_add(1);
        }
        self.cond.notify_all();
    }

    /// Wake sleepers without advancing the epoch, so a waiter that already
    /// read it still goes to sleep.
    fn wake(&self) {
        self.cond.notify_all();
    }

    fn wait(&self, seen: u64, timeout: Duration) {
        let mut epoch = self.epoch.lock();
        if *epoch == seen {
            self.cond.wait_for(&mut epoch, timeout);
        }
    }
}

#[derive(Debug)]
struct Shared<C: Config> {
    idle_park: Duration,
    /// Global queues indexed by priority tier.
    #[debug(skip)]
    injectors: [Injector<Job<C>>; TaskPriority::TIERS],
    #[debug(skip)]
    stealers: Vec<Stealer<Job<C>>>,
    #[debug(skip)]
    registry: RwLock<Registry<C>>,
    ids: IdAllocator,
    interrupts: InterruptHandle,
    halted: Mutex<Option<Interrupt>>,
    is_halted: AtomicBool,
    shutdown: AtomicBool,
    signal: Signal,
    stats: SchedulerStats,
}

/// Tier of the worker-local deques; other tiers always go global.
const LOCAL_TIER: usize = 1;

/// Jobs inspected per helping round before the awaiter sleeps.
const HELP_SCAN: usize = 64;

impl<C: Config> Shared<C> {
    fn inject(&self, job: Job<C>) {
        self.injectors[job.priority().tier()].push(job);
    }

    /// Observe a pending interrupt and halt dispatch on every worker.
    fn checkpoint(&self) -> Option<Interrupt> {
        self.stats.record_checkpoint();
        let interrupt = self.interrupts.check_and_clear()?;
        warn!(%interrupt, "scheduler: interrupt observed, halting dispatch");
        self.stats.record_interrupt();
        *self.halted.lock() = Some(interrupt.clone());
        self.is_halted.store(true, Ordering::Release);
        self.signal.notify();
        Some(interrupt)
    }

    fn halted(&self) -> Option<Interrupt> {
        if !self.is_halted.load(Ordering::Acquire) {
            return None;
        }
        self.halted.lock().clone()
    }

    fn resume(&self) -> Option<Interrupt> {
        let interrupt = {
            let mut halted = self.halted.lock();
            self.is_halted.store(false, Ordering::Release);
            halted.take()
        };
        if let Some(interrupt) = &interrupt {
            debug!(%interrupt, "scheduler: resuming dispatch");
            self.signal.notify();
        }
        interrupt
    }

    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn new_task(&self, task: Task<C>) -> (TaskId, Job<C>) {
        let cell = Arc::new(TaskCell::new(self.ids.reserve(1), task));
        let id = cell.id();
        self.registry.write().insert_task(Arc::clone(&cell));
        self.stats.record_spawn();
        debug!(task = %id, "scheduler: task spawned");
        (id, Job::Spawned(cell))
    }

    fn new_dag(&self, dag: Dag<C>) -> (DagHandle, Vec<Job<C>>) {
        let len = u32::try_from(dag.len()).unwrap_or(u32::MAX);
        let run = Arc::new(DagRun::new(dag, self.ids.reserve(len)));
        let handle = DagHandle {
            first: run.first(),
            len,
            output: run.output(),
        };
        self.registry.write().insert_dag(Arc::clone(&run));
        let mut ready = vec![];
        run.start(&mut ready);
        self.stats.record_dag();
        debug!(first = %handle.first, nodes = len, roots = ready.len(), "scheduler: dag submitted");
        (handle, ready)
    }

    fn lookup(&self, id: TaskId) -> Result<TaskRef<C>, SchedulerError<C::Error>> {
        self.registry
            .read()
            .lookup(id)
            .ok_or(SchedulerError::UnknownTask(id))
    }

    fn status(&self, id: TaskId) -> Option<TaskState> {
        self.registry.read().lookup(id).map(|task| task.state())
    }

    fn release(&self, dag: &DagHandle) {
        self.registry.write().remove_dag(dag.first);
    }

    fn release_task(&self, id: TaskId) -> bool {
        self.registry.write().remove_task(id).is_some()
    }

    fn exec_duration(&self, id: TaskId) -> Option<Duration> {
        self.registry.read().lookup(id)?.elapsed()
    }

    /// Urgent work first, then the own deque, a batch from the normal
    /// injector, the other workers' deques and finally background work.
    fn find_job(&self, local: &Worker<Job<C>>, index: usize) -> Option<Job<C>> {
        let [urgent, normal, background] = &self.injectors;
        loop {
            let mut retry = false;
            match urgent.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => retry = true,
                Steal::Empty => {}
            }
            if let Some(job) = local.pop() {
                return Some(job);
            }
            match normal.steal_batch_and_pop(local) {
                Steal::Success(job) => return Some(job),
                Steal::Retry => retry = true,
                Steal::Empty => {}
            }
            for victim in victims(index, self.stealers.len()) {
                match self.stealers[victim].steal() {
                    Steal::Success(job) => {
                        self.stats.record_steal();
                        trace!(worker = index, victim, "scheduler: job stolen");
                        return Some(job);
                    }
                    Steal::Retry => retry = true,
                    Steal::Empty => {}
                }
            }
            match background.steal() {
                Steal::Success(job) => return Some(job),
                Steal::Retry => retry = true,
                Steal::Empty => {}
            }
            if !retry {
                self.stats.record_failed_steal();
                return None;
            }
        }
    }

    /// Wait until `target` is terminal. `help` runs one job if it can and
    /// reports whether it did.
    fn await_with(&self, target: &TaskRef<C>, mut help: impl FnMut() -> bool) -> TaskResult<C> {
        loop {
            if let Some(outcome) = target.outcome() {
                return outcome;
            }
            if self.is_shut_down() {
                return Err(SchedulerError::ShutDown);
            }
            self.checkpoint();
            if let Some(interrupt) = self.halted() {
                return Err(SchedulerError::Interrupted(interrupt));
            }
            let seen = self.signal.epoch();
            if !help() && target.outcome().is_none() {
                self.signal.wait(seen, self.idle_park);
            }
        }
    }
}

/// Handle used by a worker thread, and by every task it runs, to reach the
/// pool.
struct WorkerScope<'a, C: Config> {
    shared: &'a Shared<C>,
    local: &'a Worker<Job<C>>,
    index: usize,
}

impl<C: Config> WorkerScope<'_, C> {
    fn run(&self) {
        debug!(worker = self.index, "scheduler: worker started");
        while !self.shared.is_shut_down() {
            self.shared.checkpoint();
            let seen = self.shared.signal.epoch();
            if self.shared.halted().is_none()
                && let Some(job) = self.shared.find_job(self.local, self.index)
                && self.start(job)
            {
                continue;
            }
            self.shared.signal.wait(seen, self.shared.idle_park);
        }
        debug!(worker = self.index, "scheduler: worker stopped");
    }

    /// Queue a job created on this worker.
    fn enqueue(&self, job: Job<C>) {
        if job.priority().tier() == LOCAL_TIER {
            self.local.push(job);
        } else {
            self.shared.inject(job);
        }
    }

    /// Checkpoint between dequeuing `job` and starting it. A halted pool gets
    /// the job back. Returns whether the job was dispatched.
    fn start(&self, job: Job<C>) -> bool {
        self.shared.checkpoint();
        if self.shared.halted().is_some() {
            self.enqueue(job);
            return false;
        }
        self.dispatch(job);
        true
    }

    /// Run one job `target` depends on, if one is queued.
    ///
    /// The awaiting task stays suspended below the helped job on this stack,
    /// so only the target itself or its ancestors qualify: any other job
    /// might await the suspended task and could then never finish. Jobs
    /// passed over go back to the global queues for idle workers.
    fn try_help(&self, target: &TaskRef<C>) -> bool {
        let mut passed = vec![];
        let mut found = None;
        for _ in 0..HELP_SCAN {
            match self.shared.find_job(self.local, self.index) {
                Some(job) if job.feeds(target) => {
                    found = Some(job);
                    break;
                }
                Some(job) => passed.push(job),
                None => break,
            }
        }
        if !passed.is_empty() {
            trace!(
                worker = self.index,
                passed = passed.len(),
                "scheduler: jobs passed over while awaiting",
            );
            for job in passed {
                self.shared.inject(job);
            }
            self.shared.signal.wake();
        }
        found.is_some_and(|job| self.start(job))
    }

    fn dispatch(&self, job: Job<C>) {
        let mut ready = vec![];
        let executed = job.execute(self, &mut ready);
        trace!(
            worker = self.index,
            ?executed,
            newly_ready = ready.len(),
            "scheduler: job dispatched",
        );
        self.shared.stats.record_executed(self.index, executed);
        // The first newly ready job is popped first.
        for job in ready.into_iter().rev() {
            self.enqueue(job);
        }
        self.shared.signal.notify();
        self.shared.checkpoint();
    }
}

impl<C: Config> Scheduler<C> for WorkerScope<'_, C> {
    fn spawn(&self, task: Task<C>) -> TaskId {
        let (id, job) = self.shared.new_task(task);
        self.enqueue(job);
        self.shared.signal.notify();
        id
    }

    fn await_task(&self, id: TaskId) -> TaskResult<C> {
        let target = self.shared.lookup(id)?;
        self.shared.await_with(&target, || self.try_help(&target))
    }

    fn submit_dag(&self, dag: Dag<C>) -> DagHandle {
        let (handle, ready) = self.shared.new_dag(dag);
        for job in ready.into_iter().rev() {
            self.enqueue(job);
        }
        self.shared.signal.notify();
        handle
    }

    fn release(&self, dag: &DagHandle) {
        self.shared.release(dag);
    }

    fn release_task(&self, id: TaskId) -> bool {
        self.shared.release_task(id)
    }

    fn status(&self, id: TaskId) -> Option<TaskState> {
        self.shared.status(id)
    }

    fn exec_duration(&self, id: TaskId) -> Option<Duration> {
        self.shared.exec_duration(id)
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.shared.interrupts.clone()
    }

    fn check_interrupt(&self) -> Option<Interrupt> {
        self.shared.checkpoint()
    }

    fn halted(&self) -> Option<Interrupt> {
        self.shared.halted()
    }

    fn resume(&self) -> Option<Interrupt> {
        self.shared.resume()
    }

    fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

/// Multi-worker scheduler with per-worker LIFO deques and work stealing.
///
/// Work submitted from outside the pool goes to a global injector queue; work
/// created by a running task (spawns, newly ready dependents) goes to the
/// deque of the worker running it. An idle worker takes a batch from the
/// injector, then steals the oldest job of another worker. `High` and
/// `Critical` jobs always go through a global queue taken before anything
/// else, `Low` jobs through one taken only when nothing else is found.
///
/// Awaiting from inside a task keeps the worker busy with the jobs the
/// awaited task depends on until it resolves. Awaiting from outside the pool
/// blocks the calling thread.
///
/// Dropping the scheduler stops and joins every worker; jobs still queued are
/// dropped without running.
#[derive(Debug)]
pub struct WorkStealingScheduler<C: Config> {
    shared: Arc<Shared<C>>,
    threads: Vec<JoinHandle<()>>,
}

impl<C: Config> WorkStealingScheduler<C> {
    /// Start `config.workers` worker threads.
    ///
    /// # Errors
    /// If a worker thread cannot be spawned. Workers started before the
    /// failure are stopped and joined.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerSetupError> {
        let workers: Vec<Worker<Job<C>>> = (0..config.workers.get())
            .map(|_| Worker::new_lifo())
            .collect();
        let shared = Arc::new(Shared {
            idle_park: config.idle_park,
            injectors: Default::default(),
            stealers: workers.iter().map(Worker::stealer).collect(),
            registry: RwLock::new(Registry::default()),
            ids: IdAllocator::default(),
            interrupts: InterruptHandle::new(),
            halted: Mutex::new(None),
            is_halted: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            signal: Signal::default(),
            stats: SchedulerStats::new(workers.len()),
        });

        let mut threads = Vec::with_capacity(workers.len());
        for (index, local) in workers.into_iter().enumerate() {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || {
                    WorkerScope {
                        shared: &worker_shared,
                        local: &local,
                        index,
                    }
                    .run();
                });
            match spawned {
                Ok(thread) => threads.push(thread),
                Err(source) => {
                    shutdown(&shared, threads);
                    return Err(SchedulerSetupError::SpawnWorker { index, source });
                }
            }
        }
        info!(workers = threads.len(), "scheduler: work-stealing pool started");
        Ok(Self { shared, threads })
    }

    /// Number of worker threads.
    #[must_use]
    pub fn workers(&self) -> usize {
        self.threads.len()
    }
}

fn shutdown<C: Config>(shared: &Shared<C>, threads: Vec<JoinHandle<()>>) {
    shared.shutdown.store(true, Ordering::Release);
    shared.signal.notify();
    for thread in threads {
        if thread.join().is_err() {
            warn!("scheduler: worker thread panicked");
        }
    }
}

impl<C: Config> Drop for WorkStealingScheduler<C> {
    fn drop(&mut self) {
        shutdown(&self.shared, std::mem::take(&mut self.threads));
        info!("scheduler: work-stealing pool stopped");
    }
}

impl<C: Config> Scheduler<C> for WorkStealingScheduler<C> {
    fn spawn(&self, task: Task<C>) -> TaskId {
        let (id, job) = self.shared.new_task(task);
        self.shared.inject(job);
        self.shared.signal.notify();
        id
    }

    fn await_task(&self, id: TaskId) -> TaskResult<C> {
        let target = self.shared.lookup(id)?;
        self.shared.await_with(&target, || false)
    }

    fn submit_dag(&self, dag: Dag<C>) -> DagHandle {
        let (handle, ready) = self.shared.new_dag(dag);
        for job in ready {
            self.shared.inject(job);
        }
        self.shared.signal.notify();
        handle
    }

    fn release(&self, dag: &DagHandle) {
        self.shared.release(dag);
    }

    fn release_task(&self, id: TaskId) -> bool {
        self.shared.release_task(id)
    }

    fn status(&self, id: TaskId) -> Option<TaskState> {
        self.shared.status(id)
    }

    fn exec_duration(&self, id: TaskId) -> Option<Duration> {
        self.shared.exec_duration(id)
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.shared.interrupts.clone()
    }

    fn check_interrupt(&self) -> Option<Interrupt> {
        self.shared.checkpoint()
    }

    fn halted(&self) -> Option<Interrupt> {
        self.shared.halted()
    }

    fn resume(&self) -> Option<Interrupt> {
        self.shared.resume()
    }

    fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}
