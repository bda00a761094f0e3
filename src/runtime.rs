use crate::{
    config::Config,
    dag::Dag,
    error::SchedulerError,
    executor::DagRun,
    interrupt::InterruptHandle,
    scheduler::{Scheduler, TaskResult},
    task::Task,
    types::{NodeIndex, TaskId},
};
use core::ops::Index;
use derive_more::Debug;

/// Positional `Data` inputs of a running task node, in declaration order.
#[derive(Debug)]
pub struct Inputs<'a, C: Config> {
    values: Vec<&'a C::Value>,
}

impl<'a, C: Config> Inputs<'a, C> {
    pub(crate) fn new(values: Vec<&'a C::Value>) -> Self {
        Self { values }
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the task has no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Input at `position`.
    #[must_use]
    pub fn get(&self, position: usize) -> Option<&'a C::Value> {
        self.values.get(position).copied()
    }

    /// Inputs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &'a C::Value> + '_ {
        self.values.iter().copied()
    }
}

impl<C: Config> Index<usize> for Inputs<'_, C> {
    type Output = C::Value;

    fn index(&self, position: usize) -> &Self::Output {
        self.values[position]
    }
}

/// Hooks available to a running task: its inputs and the scheduler that runs
/// it.
///
/// `spawn` and `await_task` are the compile target of source-level
/// concurrency primitives. Awaiting from inside a task does not block the
/// worker: it keeps dispatching the ready work the awaited task depends on
/// until that task resolves.
#[derive(Debug)]
pub struct TaskContext<'a, C: Config> {
    #[debug(skip)]
    scheduler: &'a dyn Scheduler<C>,
    id: TaskId,
    inputs: Inputs<'a, C>,
    #[debug(skip)]
    node: Option<(&'a DagRun<C>, NodeIndex)>,
}

impl<'a, C: Config> TaskContext<'a, C> {
    pub(crate) fn new(
        scheduler: &'a dyn Scheduler<C>,
        id: TaskId,
        inputs: Inputs<'a, C>,
        node: Option<(&'a DagRun<C>, NodeIndex)>,
    ) -> Self {
        Self {
            scheduler,
            id,
            inputs,
            node,
        }
    }

    /// Identifier of the running task.
    #[must_use]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// All positional inputs.
    #[must_use]
    pub fn inputs(&self) -> &Inputs<'a, C> {
        &self.inputs
    }

    /// Input at `position`.
    #[must_use]
    pub fn input(&self, position: usize) -> Option<&'a C::Value> {
        self.inputs.get(position)
    }

    /// Scheduler running this task.
    #[must_use]
    pub fn scheduler(&self) -> &'a dyn Scheduler<C> {
        self.scheduler
    }

    /// Create a concurrent task. See [`Scheduler::spawn`].
    pub fn spawn(&self, task: Task<C>) -> TaskId {
        self.scheduler.spawn(task)
    }

    /// Wait for another task.
    ///
    /// Awaiting the running task itself, or a node of the same graph that
    /// depends on it, can never succeed and yields
    /// [`SchedulerError::Deadlock`] immediately.
    ///
    /// # Errors
    /// See [`Scheduler::await_task`].
    pub fn await_task(&self, id: TaskId) -> TaskResult<C> {
        if id == self.id {
            return Err(SchedulerError::Deadlock(id));
        }
        if let Some((run, current)) = self.node
            && let Some(target) = run.node_of(id)
            && run.reaches(current, target)
        {
            return Err(SchedulerError::Deadlock(id));
        }
        self.scheduler.await_task(id)
    }

    /// Run a nested graph to completion. See [`Scheduler::run_dag`].
    ///
    /// # Errors
    /// See [`Scheduler::run_dag`].
    pub fn run_dag(&self, dag: Dag<C>) -> TaskResult<C> {
        self.scheduler.run_dag(dag)
    }

    /// Handle on the interrupt register of the running scheduler.
    #[must_use]
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.scheduler.interrupt_handle()
    }
}

/// Registration of a submitted [`Dag`]: node `i` got identifier
/// `first + i`.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagHandle {
    pub(crate) first: TaskId,
    pub(crate) len: u32,
    pub(crate) output: NodeIndex,
}

impl DagHandle {
    /// Identifier of `node`, if it belongs to the graph.
    #[must_use]
    pub fn task_id(&self, node: NodeIndex) -> Option<TaskId> {
        (node.0 < self.len).then(|| self.first.offset(node.0))
    }

    /// Identifier of the output node.
    #[must_use]
    pub fn output(&self) -> TaskId {
        self.first.offset(self.output.0)
    }

    /// Identifiers of all nodes in insertion order.
    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        (0..self.len).map(|offset| self.first.offset(offset))
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false: a finished graph has at least one node.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
