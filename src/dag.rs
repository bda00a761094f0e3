mod builder;
mod order;

pub use crate::dag::builder::{DagBuilder, ResourceRef, Statement};
use crate::{
    config::Config,
    task::{Operation, TaskPriority},
    types::{NodeIndex, Span},
};
use core::fmt;
use derive_more::{Debug, Display};

/// Relationship carried by an edge.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    /// Producer → consumer value flow. Orders only that producer/consumer
    /// pair.
    Data,
    /// Forced sequential order, used for side effects on a shared resource.
    Control,
    /// Entry into an explicitly concurrent region. Orders like `Control`.
    Spawn,
}

/// A typed dependency: `to` may not start before `from` has completed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Upstream node.
    pub from: NodeIndex,
    /// Downstream node.
    pub to: NodeIndex,
    /// Relationship.
    pub kind: EdgeKind,
}

/// Where a value node's value comes from.
#[derive(Debug, Clone)]
pub enum ValueSource<C: Config> {
    /// Forwarded from the producer node once it completes.
    Produced(NodeIndex),
    /// A literal known at build time.
    Constant(C::Value),
}

/// Payload of a DAG vertex.
pub enum NodeKind<C: Config> {
    /// A computation dispatched to a worker.
    Task(Operation<C>),
    /// A value with no execution of its own, resolved inline when its producer
    /// completes.
    Value(ValueSource<C>),
    /// A sequencing point carrying no data.
    Control,
}

impl<C: Config> fmt::Debug for NodeKind<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(_) => f.write_str("Task"),
            Self::Value(source) => f.debug_tuple("Value").field(source).finish(),
            Self::Control => f.write_str("Control"),
        }
    }
}

impl<C: Config> NodeKind<C> {
    /// Whether the node has a value that can flow along a `Data` edge.
    #[must_use]
    pub fn has_value(&self) -> bool {
        !matches!(self, Self::Control)
    }

    /// Whether the node is dispatched to a worker.
    #[must_use]
    pub fn is_task(&self) -> bool {
        matches!(self, Self::Task(_))
    }
}

/// A DAG vertex.
#[derive(Debug)]
pub struct Node<C: Config> {
    pub(crate) kind: NodeKind<C>,
    /// Positional `Data` inputs in declaration order. May repeat a producer.
    pub(crate) inputs: Vec<NodeIndex>,
    /// Distinct upstream nodes over all edge kinds.
    pub(crate) dependencies: Vec<NodeIndex>,
    /// Distinct downstream nodes over all edge kinds.
    pub(crate) dependents: Vec<NodeIndex>,
    pub(crate) label: Option<String>,
    pub(crate) span: Option<Span>,
    pub(crate) priority: TaskPriority,
}

impl<C: Config> Node<C> {
    pub(crate) fn new(kind: NodeKind<C>) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            label: None,
            span: None,
            priority: TaskPriority::Normal,
        }
    }

    /// Node payload.
    #[must_use]
    pub fn kind(&self) -> &NodeKind<C> {
        &self.kind
    }

    /// Positional `Data` inputs.
    #[must_use]
    pub fn inputs(&self) -> &[NodeIndex] {
        &self.inputs
    }

    /// Distinct upstream nodes.
    #[must_use]
    pub fn dependencies(&self) -> &[NodeIndex] {
        &self.dependencies
    }

    /// Distinct downstream nodes.
    #[must_use]
    pub fn dependents(&self) -> &[NodeIndex] {
        &self.dependents
    }

    /// Diagnostic name.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Source provenance.
    #[must_use]
    pub fn span(&self) -> Option<Span> {
        self.span
    }

    /// Dispatch priority of a task node, `Normal` for the others.
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }
}

/// Dependency graph of exactly one function activation.
///
/// Nodes live in an arena and refer to each other by [`NodeIndex`]; the whole
/// graph is dropped at once when the activation completes. Acyclicity is
/// enforced while building, so a `Dag` always has a topological order.
#[must_use]
#[derive(Debug)]
pub struct Dag<C: Config> {
    pub(crate) nodes: Vec<Node<C>>,
    pub(crate) edges: Vec<Edge>,
    /// Topological order computed by `finish`.
    pub(crate) order: Vec<NodeIndex>,
    /// Longest distance (in edges) from any root.
    pub(crate) depth: Vec<u32>,
    pub(crate) output: NodeIndex,
}

impl<C: Config> Dag<C> {
    /// Start building a graph.
    pub fn builder() -> DagBuilder<C> {
        DagBuilder::new()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes. Never true for a finished graph.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node at `index`.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node<C>> {
        self.nodes.get(index.index())
    }

    /// All nodes with their indices, in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node<C>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeIndex::from_usize(idx), node))
    }

    /// All edges in insertion order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// The designated output node whose resolution ends `run_dag`.
    pub fn output(&self) -> NodeIndex {
        self.output
    }

    /// Nodes without dependencies.
    pub fn roots(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes()
            .filter(|(_, node)| node.dependencies.is_empty())
            .map(|(idx, _)| idx)
    }

    /// Nodes without dependents.
    pub fn leaves(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.nodes()
            .filter(|(_, node)| node.dependents.is_empty())
            .map(|(idx, _)| idx)
    }

    /// A topological order: every node appears after all of its
    /// dependencies.
    #[must_use]
    pub fn topological_order(&self) -> &[NodeIndex] {
        &self.order
    }

    /// Longest distance in edges from any root to `index`.
    #[must_use]
    pub fn depth(&self, index: NodeIndex) -> Option<u32> {
        self.depth.get(index.index()).copied()
    }

    /// Number of nodes on the longest dependency chain: the minimum number of
    /// sequential steps needed to evaluate the graph.
    #[must_use]
    pub fn critical_path_length(&self) -> usize {
        self.depth
            .iter()
            .max()
            .map_or(0, |&depth| depth as usize + 1)
    }

    /// Size of the widest depth level: how many nodes may be ready at once
    /// when every node takes the same time.
    #[must_use]
    pub fn max_parallelism(&self) -> usize {
        let mut width = vec![0usize; self.critical_path_length()];
        for &depth in &self.depth {
            width[depth as usize] += 1;
        }
        width.into_iter().max().unwrap_or(0)
    }

    /// Entry nodes of explicitly concurrent regions (targets of `Spawn`
    /// edges).
    pub fn spawn_regions(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        let mut seen = crate::types::HashSet::default();
        self.edges
            .iter()
            .filter(|edge| edge.kind == EdgeKind::Spawn)
            .map(|edge| edge.to)
            .filter(move |to| seen.insert(*to))
    }
}
