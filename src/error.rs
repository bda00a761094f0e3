use crate::{
    interrupt::Interrupt,
    propagate::ErrorGraph,
    types::{NodeIndex, TaskId},
};
use core::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error returned while building a [`Dag`](crate::dag::Dag).
///
/// All variants are build-time diagnostics: they surface before any node is
/// scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BuildError {
    /// Inserting `node_a -> node_b` would close a cycle.
    #[error("edge {node_a} -> {node_b} would create a dependency cycle")]
    CyclicDependency {
        /// Source of the rejected edge.
        node_a: NodeIndex,
        /// Target of the rejected edge.
        node_b: NodeIndex,
    },
    /// The index does not belong to the graph under construction.
    #[error("unknown node {0}")]
    UnknownNode(NodeIndex),
    /// A `Data` edge must flow from an earlier-inserted producer to a later
    /// consumer.
    #[error("data edge {from} -> {to} runs against insertion order")]
    DataEdgeOutOfOrder {
        /// Producer.
        from: NodeIndex,
        /// Consumer.
        to: NodeIndex,
    },
    /// The node produces no value (control node) but is used as one.
    #[error("node {0} produces no value")]
    NoValue(NodeIndex),
    /// A statement refers to a name absent from the scope table.
    #[error("unbound name `{0}`")]
    UnboundName(String),
    /// `finish` was called on a graph without nodes.
    #[error("graph has no nodes")]
    Empty,
}

/// Error returned by [`SchedulerConfig`](crate::config::SchedulerConfig)
/// parsing and by scheduler construction.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerSetupError {
    /// A configuration value is out of range or unparsable.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread {index}")]
    SpawnWorker {
        /// Worker index.
        index: usize,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}

/// Root cause of a task failure.
///
/// One allocation per failing task: every awaiter of the task or of any of
/// its dependents observes a clone of the same `Arc`.
#[derive(Debug)]
pub enum Cause<E> {
    /// The task returned its domain error.
    Error(Arc<E>),
    /// The task panicked; holds the panic message.
    Panic(Arc<str>),
}

impl<E> Clone for Cause<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Error(err) => Self::Error(Arc::clone(err)),
            Self::Panic(msg) => Self::Panic(Arc::clone(msg)),
        }
    }
}

impl<E: fmt::Display> fmt::Display for Cause<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => err.fmt(f),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// A task failure as reported to awaiters.
///
/// Awaiting a dependent that never ran because of an upstream failure yields
/// the same `Failure` as awaiting the origin itself, so callers can match on
/// the root cause directly.
#[derive(Debug)]
pub struct Failure<E> {
    origin: TaskId,
    node: Option<NodeIndex>,
    cause: Cause<E>,
    graph: Option<ErrorGraph>,
}

impl<E> Clone for Failure<E> {
    fn clone(&self) -> Self {
        Self {
            origin: self.origin,
            node: self.node,
            cause: self.cause.clone(),
            graph: self.graph.clone(),
        }
    }
}

impl<E> Failure<E> {
    pub(crate) fn new(origin: TaskId, node: Option<NodeIndex>, cause: Cause<E>) -> Self {
        Self {
            origin,
            node,
            cause,
            graph: None,
        }
    }

    pub(crate) fn with_graph(mut self, graph: ErrorGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Task whose own computation failed.
    #[must_use]
    pub fn origin(&self) -> TaskId {
        self.origin
    }

    /// DAG node of the origin, if the failing task was a DAG node.
    #[must_use]
    pub fn origin_node(&self) -> Option<NodeIndex> {
        self.node
    }

    /// Root cause.
    #[must_use]
    pub fn cause(&self) -> &Cause<E> {
        &self.cause
    }

    /// The domain error, unless the task panicked.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match &self.cause {
            Cause::Error(err) => Some(err),
            Cause::Panic(_) => None,
        }
    }

    /// Shared handle on the domain error, unless the task panicked.
    #[must_use]
    pub fn shared_error(&self) -> Option<&Arc<E>> {
        match &self.cause {
            Cause::Error(err) => Some(err),
            Cause::Panic(_) => None,
        }
    }

    /// Nodes that were marked failed because of this failure. Only present
    /// for DAG nodes.
    #[must_use]
    pub fn error_graph(&self) -> Option<&ErrorGraph> {
        self.graph.as_ref()
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.origin, self.cause)
    }
}

/// Error returned by `await_task` and `run_dag`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedulerError<E> {
    /// The awaited task, or one of its ancestors, failed.
    #[error("{0}")]
    Task(Failure<E>),
    /// Dispatch was halted by an interrupt before the awaited task resolved.
    /// No node is at fault.
    #[error("interrupted: {0}")]
    Interrupted(Interrupt),
    /// The identifier was never issued by this scheduler, or was released.
    #[error("unknown task {0}")]
    UnknownTask(TaskId),
    /// The awaited task can never complete.
    #[error("{0} can never complete: no runnable work remains")]
    Deadlock(TaskId),
    /// The awaited node is a control node and carries no value.
    #[error("{0} produces no value")]
    NoValue(TaskId),
    /// The scheduler is shutting down.
    #[error("scheduler is shutting down")]
    ShutDown,
}

impl<E> Clone for SchedulerError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Task(failure) => Self::Task(failure.clone()),
            Self::Interrupted(interrupt) => Self::Interrupted(interrupt.clone()),
            Self::UnknownTask(id) => Self::UnknownTask(*id),
            Self::Deadlock(id) => Self::Deadlock(*id),
            Self::NoValue(id) => Self::NoValue(*id),
            Self::ShutDown => Self::ShutDown,
        }
    }
}

impl<E> SchedulerError<E> {
    /// The task failure, if this is one.
    #[must_use]
    pub fn failure(&self) -> Option<&Failure<E>> {
        match self {
            Self::Task(failure) => Some(failure),
            _ => None,
        }
    }

    /// The interrupt that halted dispatch, if this is one.
    #[must_use]
    pub fn interrupt(&self) -> Option<&Interrupt> {
        match self {
            Self::Interrupted(interrupt) => Some(interrupt),
            _ => None,
        }
    }
}
