use crate::{
    config::Config,
    runtime::TaskContext,
    types::{Span, TaskId},
};
use derive_more::{Debug, Display};

/// Closure run by a worker when a task is dispatched.
///
/// Receives the [`TaskContext`] giving access to the task's `Data` inputs and
/// to the `spawn`/`await` hooks of the scheduler that runs it.
pub type Operation<C> = Box<
    dyn FnOnce(&TaskContext<'_, C>) -> Result<<C as Config>::Value, <C as Config>::Error> + Send,
>;

/// Dispatch priority of a task.
///
/// `High` and `Critical` work is taken before anything else, `Low` work only
/// when no other work is found. Order is FIFO within a priority.
#[derive(Debug, Display, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskPriority {
    /// Background work.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Latency-sensitive work.
    High,
    /// Work that must not wait, such as supervision tasks.
    Critical,
}

impl TaskPriority {
    /// Number of distinct run-queue tiers.
    pub(crate) const TIERS: usize = 3;

    /// Run-queue tier: 0 is taken first. `High` and `Critical` share a tier.
    pub(crate) fn tier(self) -> usize {
        match self {
            Self::Critical | Self::High => 0,
            Self::Normal => 1,
            Self::Low => 2,
        }
    }
}

/// A single unit of computation, either spawned ad hoc or wrapped by a task
/// node of a [`Dag`](crate::dag::Dag).
///
/// The closure must be `Send + 'static`: captured values have to be either
/// transferable (moved in) or shareable (`Arc`-wrapped). Values that are
/// neither are rejected at the `spawn` call site by the compiler.
#[must_use]
#[derive(Debug)]
pub struct Task<C: Config> {
    name: Option<String>,
    span: Option<Span>,
    priority: TaskPriority,
    #[debug(skip)]
    operation: Operation<C>,
}

/// A [`Task`] taken apart by the scheduler.
pub(crate) struct TaskParts<C: Config> {
    pub(crate) name: Option<String>,
    pub(crate) span: Option<Span>,
    pub(crate) priority: TaskPriority,
    pub(crate) operation: Operation<C>,
}

impl<C: Config> Task<C> {
    /// Wrap a closure into a task.
    pub fn new<F>(operation: F) -> Self
    where
        F: FnOnce(&TaskContext<'_, C>) -> Result<C::Value, C::Error> + Send + 'static,
    {
        Self {
            name: None,
            span: None,
            priority: TaskPriority::Normal,
            operation: Box::new(operation),
        }
    }

    /// Wrap a closure into a task carrying a diagnostic name.
    pub fn named<F>(name: impl Into<String>, operation: F) -> Self
    where
        F: FnOnce(&TaskContext<'_, C>) -> Result<C::Value, C::Error> + Send + 'static,
    {
        Self::new(operation).with_name(name)
    }

    /// A task that immediately yields `value`.
    pub fn ready(value: C::Value) -> Self {
        Self::new(move |_| Ok(value))
    }

    /// Attach a diagnostic name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach source provenance.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Set the dispatch priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Diagnostic name, if any.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Source provenance, if any.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// Dispatch priority.
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    pub(crate) fn into_parts(self) -> TaskParts<C> {
        let Self {
            name,
            span,
            priority,
            operation,
        } = self;
        TaskParts {
            name,
            span,
            priority,
            operation,
        }
    }
}

/// Lifecycle of a task.
///
/// `Pending → Running → Completed` or `Running → Failed`. Dependents of a
/// failed DAG node move `Pending → Failed` directly without ever running.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Created, not yet claimed by a worker.
    Pending,
    /// Claimed by exactly one worker and executing.
    Running,
    /// Finished and its result slot is populated.
    Completed,
    /// Finished unsuccessfully, or never ran because an ancestor failed.
    Failed(FailureKind),
}

impl TaskState {
    /// Whether the state is `Completed` or `Failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

/// Why a task ended in [`TaskState::Failed`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// The task's own computation failed.
    Local,
    /// The task was never run because `origin` failed upstream.
    Propagated {
        /// Task whose own computation failed.
        origin: TaskId,
    },
}
