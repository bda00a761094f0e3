use crate::{
    config::{ConcurrencyLayer, Config, SchedulerConfig},
    dag::Dag,
    error::{SchedulerError, SchedulerSetupError},
    executor::{CooperativeScheduler, WorkStealingScheduler},
    interrupt::{Interrupt, InterruptHandle},
    runtime::DagHandle,
    stats::StatsSnapshot,
    task::{Task, TaskState},
    types::TaskId,
};
use core::time::Duration;
use tracing::info;

/// Result of awaiting a task.
pub type TaskResult<C> = Result<<C as Config>::Value, SchedulerError<<C as Config>::Error>>;

/// Integration surface between compiled programs and a scheduler variant.
///
/// Object safe: running tasks see the scheduler as `&dyn Scheduler<C>`
/// through their [`TaskContext`](crate::runtime::TaskContext).
pub trait Scheduler<C: Config> {
    /// Create a concurrent task and return its identifier immediately.
    fn spawn(&self, task: Task<C>) -> TaskId;

    /// Wait until the task is terminal and return its result.
    ///
    /// Idempotent: awaiting a completed task again returns a clone of the same
    /// value, and awaiting a failed one returns the same shared error.
    ///
    /// # Errors
    /// - [`SchedulerError::Task`] if the task or one of its ancestors failed.
    /// - [`SchedulerError::Interrupted`] if dispatch is halted by an interrupt
    ///   before the task resolves.
    /// - [`SchedulerError::UnknownTask`] for a foreign or released identifier.
    /// - [`SchedulerError::Deadlock`] if the task can never complete.
    /// - [`SchedulerError::NoValue`] for a control node.
    /// - [`SchedulerError::ShutDown`] if the scheduler is shutting down.
    fn await_task(&self, id: TaskId) -> TaskResult<C>;

    /// Register every node of `dag` and make its roots ready.
    fn submit_dag(&self, dag: Dag<C>) -> DagHandle;

    /// Forget the registrations of a submitted graph. Nodes already queued
    /// still run; their identifiers become unknown.
    fn release(&self, dag: &DagHandle);

    /// Forget an ad-hoc task created with [`spawn`](Self::spawn). A task that
    /// has not finished still runs; its identifier becomes unknown and its
    /// result is dropped with the last reference. Returns whether `id` named a
    /// registered ad-hoc task.
    fn release_task(&self, id: TaskId) -> bool;

    /// Await an ad-hoc task and release it.
    ///
    /// # Errors
    /// See [`await_task`](Self::await_task). The task stays registered if
    /// the wait is interrupted.
    fn join(&self, id: TaskId) -> TaskResult<C> {
        let result = self.await_task(id);
        if !matches!(result, Err(SchedulerError::Interrupted(_))) {
            self.release_task(id);
        }
        result
    }

    /// Submit `dag`, await its output node and release it.
    ///
    /// Dispatch of unrelated ready nodes continues while waiting, and nodes of
    /// `dag` that are not ancestors of the output are not abandoned.
    ///
    /// # Errors
    /// See [`await_task`](Self::await_task).
    fn run_dag(&self, dag: Dag<C>) -> TaskResult<C> {
        let handle = self.submit_dag(dag);
        let result = self.await_task(handle.output());
        self.release(&handle);
        result
    }

    /// Lifecycle state of a task, `None` for an unknown identifier.
    fn status(&self, id: TaskId) -> Option<TaskState>;

    /// Wall-clock time the task's closure ran for, once it returned. `None`
    /// for an unknown identifier or a task that has not run.
    fn exec_duration(&self, id: TaskId) -> Option<Duration>;

    /// Thread-safe handle for raising interrupts from outside.
    fn interrupt_handle(&self) -> InterruptHandle;

    /// Return and clear the pending interrupt, halting dispatch if there was
    /// one. Schedulers call this at every node boundary.
    fn check_interrupt(&self) -> Option<Interrupt>;

    /// The interrupt that halted dispatch, if dispatch is halted.
    fn halted(&self) -> Option<Interrupt>;

    /// Clear the halt and continue dispatching. Returns the interrupt that
    /// caused it.
    fn resume(&self) -> Option<Interrupt>;

    /// Counters accumulated since construction.
    fn stats(&self) -> StatsSnapshot;
}

/// Build the scheduler variant selected by `config.layer`: the cooperative
/// scheduler for [`ConcurrencyLayer::Sequential`], the work-stealing pool
/// otherwise.
///
/// # Errors
/// If a worker thread cannot be spawned.
pub fn build<C: Config>(
    config: SchedulerConfig,
) -> Result<Box<dyn Scheduler<C>>, SchedulerSetupError> {
    info!(layer = ?config.layer, workers = config.workers.get(), "scheduler: building");
    Ok(match config.layer {
        ConcurrencyLayer::Sequential => Box::new(CooperativeScheduler::new()),
        ConcurrencyLayer::Explicit | ConcurrencyLayer::Transparent => {
            Box::new(WorkStealingScheduler::new(config)?)
        }
    })
}
