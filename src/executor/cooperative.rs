use crate::{
    config::Config,
    dag::Dag,
    error::SchedulerError,
    executor::state::{DagRun, IdAllocator, Job, Registry, TaskCell, TaskRef},
    interrupt::{Interrupt, InterruptHandle},
    runtime::DagHandle,
    scheduler::{Scheduler, TaskResult},
    stats::{SchedulerStats, StatsSnapshot},
    task::{Task, TaskPriority, TaskState},
    types::TaskId,
};
use core::{cell::RefCell, time::Duration};
use derive_more::Debug;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, trace, warn};

/// FIFO queues, one per priority tier.
struct RunQueue<C: Config> {
    tiers: [VecDeque<Job<C>>; TaskPriority::TIERS],
}

impl<C: Config> Default for RunQueue<C> {
    fn default() -> Self {
        Self {
            tiers: Default::default(),
        }
    }
}

impl<C: Config> RunQueue<C> {
    fn push(&mut self, job: Job<C>) {
        self.tiers[job.priority().tier()].push_back(job);
    }

    fn pop(&mut self) -> Option<Job<C>> {
        self.tiers.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Put a popped job back at the head of its tier.
    fn requeue(&mut self, job: Job<C>) {
        self.tiers[job.priority().tier()].push_front(job);
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

impl<C: Config> Extend<Job<C>> for RunQueue<C> {
    fn extend<I: IntoIterator<Item = Job<C>>>(&mut self, jobs: I) {
        for job in jobs {
            self.push(job);
        }
    }
}

/// Single-worker scheduler with deterministic interleaving.
///
/// Everything runs on the calling thread. Ready work is kept in FIFO queues,
/// one per priority tier, and is only dispatched while some caller is inside
/// [`await_task`](Scheduler::await_task) (or [`run_until_idle`]): tasks
/// switch only at await points. The interrupt register is checked before and
/// after every dispatch.
///
/// [`run_until_idle`]: CooperativeScheduler::run_until_idle
#[derive(Debug)]
pub struct CooperativeScheduler<C: Config> {
    #[debug(skip)]
    queue: RefCell<RunQueue<C>>,
    #[debug(skip)]
    registry: RefCell<Registry<C>>,
    ids: IdAllocator,
    interrupts: InterruptHandle,
    halted: RefCell<Option<Interrupt>>,
    stats: SchedulerStats,
}

impl<C: Config> Default for CooperativeScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> CooperativeScheduler<C> {
    /// An idle scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            queue: RefCell::new(RunQueue::default()),
            registry: RefCell::new(Registry::default()),
            ids: IdAllocator::default(),
            interrupts: InterruptHandle::new(),
            halted: RefCell::new(None),
            stats: SchedulerStats::new(1),
        }
    }

    /// Number of jobs waiting in the run queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Dispatch until the run queue is empty.
    ///
    /// # Errors
    /// [`SchedulerError::Interrupted`] if an interrupt halts dispatch first.
    pub fn run_until_idle(&self) -> Result<(), SchedulerError<C::Error>> {
        loop {
            let Some(job) = self.next_job().map_err(SchedulerError::Interrupted)? else {
                return Ok(());
            };
            self.dispatch(job);
        }
    }

    /// Pop the next job unless dispatch is halted. The register is checked
    /// again between the pop and the start; a halted scheduler puts the job
    /// back.
    fn next_job(&self) -> Result<Option<Job<C>>, Interrupt> {
        self.checkpoint();
        if let Some(interrupt) = self.halted() {
            return Err(interrupt);
        }
        let Some(job) = self.queue.borrow_mut().pop() else {
            return Ok(None);
        };
        if let Some(interrupt) = self.checkpoint() {
            self.queue.borrow_mut().requeue(job);
            return Err(interrupt);
        }
        Ok(Some(job))
    }

    /// Observe a pending interrupt and halt.
    fn checkpoint(&self) -> Option<Interrupt> {
        self.stats.record_checkpoint();
        let interrupt = self.interrupts.check_and_clear()?;
        warn!(%interrupt, "scheduler: interrupt observed, halting dispatch");
        self.stats.record_interrupt();
        *self.halted.borrow_mut() = Some(interrupt.clone());
        Some(interrupt)
    }

    fn dispatch(&self, job: Job<C>) {
        let mut ready = vec![];
        let executed = job.execute(self, &mut ready);
        trace!(?executed, newly_ready = ready.len(), "scheduler: job dispatched");
        self.stats.record_executed(0, executed);
        self.queue.borrow_mut().extend(ready);
        self.checkpoint();
    }

    fn drive(&self, target: &TaskRef<C>) -> TaskResult<C> {
        loop {
            if let Some(outcome) = target.outcome() {
                return outcome;
            }
            let Some(job) = self.next_job().map_err(SchedulerError::Interrupted)? else {
                warn!(task = %target.id(), "scheduler: run queue empty, awaited task can never complete");
                return Err(SchedulerError::Deadlock(target.id()));
            };
            self.dispatch(job);
        }
    }

    fn lookup(&self, id: TaskId) -> Result<TaskRef<C>, SchedulerError<C::Error>> {
        self.registry
            .borrow()
            .lookup(id)
            .ok_or(SchedulerError::UnknownTask(id))
    }
}

impl<C: Config> Scheduler<C> for CooperativeScheduler<C> {
    fn spawn(&self, task: Task<C>) -> TaskId {
        let cell = Arc::new(TaskCell::new(self.ids.reserve(1), task));
        let id = cell.id();
        self.registry.borrow_mut().insert_task(Arc::clone(&cell));
        self.queue.borrow_mut().push(Job::Spawned(cell));
        self.stats.record_spawn();
        debug!(task = %id, "scheduler: task spawned");
        id
    }

    fn await_task(&self, id: TaskId) -> TaskResult<C> {
        let target = self.lookup(id)?;
        self.drive(&target)
    }

    fn submit_dag(&self, dag: Dag<C>) -> DagHandle {
        let len = u32::try_from(dag.len()).unwrap_or(u32::MAX);
        let run = Arc::new(DagRun::new(dag, self.ids.reserve(len)));
        let handle = DagHandle {
            first: run.first(),
            len,
            output: run.output(),
        };
        self.registry.borrow_mut().insert_dag(Arc::clone(&run));
        let mut ready = vec![];
        run.start(&mut ready);
        debug!(first = %handle.first, nodes = len, roots = ready.len(), "scheduler: dag submitted");
        self.queue.borrow_mut().extend(ready);
        self.stats.record_dag();
        handle
    }

    fn release(&self, dag: &DagHandle) {
        self.registry.borrow_mut().remove_dag(dag.first);
    }

    fn release_task(&self, id: TaskId) -> bool {
        self.registry.borrow_mut().remove_task(id).is_some()
    }

    fn status(&self, id: TaskId) -> Option<TaskState> {
        self.registry.borrow().lookup(id).map(|task| task.state())
    }

    fn exec_duration(&self, id: TaskId) -> Option<Duration> {
        self.registry.borrow().lookup(id)?.elapsed()
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupts.clone()
    }

    fn check_interrupt(&self) -> Option<Interrupt> {
        self.checkpoint()
    }

    fn halted(&self) -> Option<Interrupt> {
        self.halted.borrow().clone()
    }

    fn resume(&self) -> Option<Interrupt> {
        let interrupt = self.halted.borrow_mut().take();
        if let Some(interrupt) = &interrupt {
            debug!(%interrupt, "scheduler: resuming dispatch");
        }
        interrupt
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}
