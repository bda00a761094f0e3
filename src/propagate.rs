use crate::{
    config::Config,
    executor::DagRun,
    types::{HashMap, NodeIndex, Span, TaskId},
};
use core::fmt;
use tracing::debug;

/// Mark every transitive dependent of the failed node `origin` as failed.
///
/// Walks the dependents depth-first and moves each `Pending` node to
/// `Failed { origin }`. A node that is already failed stops the walk along
/// that path: its own dependents were or are being marked by whoever failed
/// it. A dependent of a failed node can never be running or completed, since
/// it cannot become ready.
///
/// Returns the number of nodes marked.
pub(crate) fn propagate<C: Config>(run: &DagRun<C>, origin: NodeIndex) -> usize {
    let mut marked = 0;
    let mut stack: Vec<NodeIndex> = run.children(origin).collect();
    while let Some(node) = stack.pop() {
        if run.mark_failed(node, origin) {
            marked += 1;
            stack.extend(run.children(node));
        }
    }
    if marked > 0 {
        debug!(
            origin = %run.task_id(origin),
            marked,
            "propagate: dependents marked failed",
        );
    }
    marked
}

/// A node reached by a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedNode {
    /// Arena index of the node.
    pub node: NodeIndex,
    /// Task identifier of the node.
    pub task: TaskId,
    /// Node through which the failure reached this one. `None` for the
    /// origin.
    pub via: Option<NodeIndex>,
    /// Diagnostic name.
    pub label: Option<String>,
    /// Source provenance.
    pub span: Option<Span>,
}

/// Subgraph of nodes failed because of one origin, for diagnostics.
///
/// Contains the origin followed by every dependent marked with that origin, in
/// breadth-first order from the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorGraph {
    nodes: Vec<FailedNode>,
    position: HashMap<NodeIndex, usize>,
}

impl ErrorGraph {
    pub(crate) fn collect<C: Config>(run: &DagRun<C>, origin: NodeIndex) -> Self {
        let mut graph = Self {
            nodes: vec![],
            position: HashMap::default(),
        };
        graph.record(run, origin, None);
        let mut cursor = 0;
        while let Some(current) = graph.nodes.get(cursor).map(|failed| failed.node) {
            cursor += 1;
            for child in run.children(current) {
                if !graph.position.contains_key(&child) && run.failed_by(child, origin) {
                    graph.record(run, child, Some(current));
                }
            }
        }
        graph
    }

    fn record<C: Config>(&mut self, run: &DagRun<C>, node: NodeIndex, via: Option<NodeIndex>) {
        self.position.insert(node, self.nodes.len());
        self.nodes.push(FailedNode {
            node,
            task: run.task_id(node),
            via,
            label: run.label(node).map(str::to_owned),
            span: run.span(node),
        });
    }

    /// The node whose own computation failed.
    #[must_use]
    pub fn origin(&self) -> &FailedNode {
        &self.nodes[0]
    }

    /// Origin first, then dependents in breadth-first order.
    #[must_use]
    pub fn nodes(&self) -> &[FailedNode] {
        &self.nodes
    }

    /// Number of nodes, origin included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false: the origin is always present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` failed because of this origin.
    #[must_use]
    pub fn contains(&self, node: NodeIndex) -> bool {
        self.position.contains_key(&node)
    }

    /// Chain of nodes from the origin to `node`, both included.
    #[must_use]
    pub fn path_to(&self, node: NodeIndex) -> Option<Vec<NodeIndex>> {
        let mut path = vec![];
        let mut current = Some(node);
        while let Some(node) = current {
            let failed = &self.nodes[*self.position.get(&node)?];
            path.push(failed.node);
            current = failed.via;
        }
        path.reverse();
        Some(path)
    }
}

impl fmt::Display for ErrorGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = self.origin();
        write!(f, "failure of {}", origin.task)?;
        if let Some(label) = &origin.label {
            write!(f, " ({label})")?;
        }
        if let Some(span) = origin.span {
            write!(f, " at {span}")?;
        }
        write!(f, " reached {} dependent(s)", self.nodes.len() - 1)
    }
}
