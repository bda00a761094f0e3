use crate::{
    config::Config,
    dag::{Dag, NodeKind},
    executor::state::{DagRun, LayoutKind, NodeLayout, NodeSlot, OutputSlot, StatusCell},
    stats::ExecTime,
    sync::AtomicU32,
    types::TaskId,
};
use parking_lot::Mutex;
use unzip3::Unzip3;

impl<C: Config> DagRun<C> {
    /// Materialize the run-time slots of a finished graph whose node `i` gets
    /// identifier `first + i`.
    ///
    /// Children are classified the same way for every node:
    ///
    /// ```text
    ///   A     B
    ///    \   /
    ///      C
    ///      |
    ///      D
    /// ```
    ///
    /// C has two parents, so `A -> C` and `B -> C` are shared edges: C becomes
    /// ready only when the last of A and B decrements its counter to zero. D
    /// has a single parent, so `C -> D` is owned and D is ready as soon as C
    /// completes.
    pub(crate) fn new(dag: Dag<C>, first: TaskId) -> Self {
        let Dag { nodes, output, .. } = dag;
        let parent_counts: Vec<u32> = nodes
            .iter()
            .map(|node| u32::try_from(node.dependencies.len()).unwrap_or(u32::MAX))
            .collect();

        let (slots, layouts, operations) = nodes
            .into_iter()
            .enumerate()
            .map(|(idx, node)| {
                let mut owned_children = vec![];
                let mut shared_children = vec![];
                for &child in &node.dependents {
                    if parent_counts[child.index()] == 1 {
                        owned_children.push(child);
                    } else {
                        shared_children.push(child);
                    }
                }
                // Ascending order keeps neighbouring slots together.
                owned_children.sort_unstable();
                shared_children.sort_unstable();

                let (kind, operation) = match node.kind {
                    NodeKind::Task(operation) => (LayoutKind::Task, Some(operation)),
                    NodeKind::Value(source) => (LayoutKind::Value(source), None),
                    NodeKind::Control => (LayoutKind::Control, None),
                };
                let slot = NodeSlot {
                    status: StatusCell::new(),
                    parents_left: AtomicU32::new(parent_counts[idx]),
                    output: OutputSlot::<C>::new(None),
                    elapsed: ExecTime::default(),
                };
                let layout = NodeLayout {
                    kind,
                    inputs: node.inputs,
                    owned_children,
                    shared_children,
                    label: node.label,
                    span: node.span,
                    priority: node.priority,
                };
                (slot, layout, Mutex::new(operation))
            })
            .unzip3();

        Self {
            first,
            slots,
            layouts,
            operations,
            output,
        }
    }
}
