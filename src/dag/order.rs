use crate::{
    config::Config,
    dag::Node,
    error::BuildError,
    types::{HashSet, NodeIndex},
};
use rustc_hash::FxBuildHasher;
use std::collections::VecDeque;

/// Topological order maintained incrementally while edges are inserted
/// (Pearce–Kelly).
///
/// `ord[n]` is the position of node `n` in the current order. An edge
/// `from -> to` with `ord[from] < ord[to]` is accepted in O(1). Otherwise only
/// the affected region `ord[to]..=ord[from]` is searched: forward from `to`
/// looking for `from` (which would close a cycle), backward from `from`, and
/// the two visited sets are reassigned the pool of their positions.
#[derive(Debug, Default)]
pub(crate) struct TopoMarker {
    ord: Vec<u32>,
}

impl TopoMarker {
    /// Register a new node at the end of the order.
    pub(crate) fn push(&mut self) {
        let next = u32::try_from(self.ord.len()).unwrap_or(u32::MAX);
        self.ord.push(next);
    }

    fn ord(&self, node: NodeIndex) -> u32 {
        self.ord[node.index()]
    }

    /// Reorder so that `from` precedes `to`, or report the cycle the edge
    /// would close. The order is left untouched on error.
    pub(crate) fn insert_edge<C: Config>(
        &mut self,
        nodes: &[Node<C>],
        from: NodeIndex,
        to: NodeIndex,
    ) -> Result<(), BuildError> {
        let cycle = BuildError::CyclicDependency {
            node_a: from,
            node_b: to,
        };
        if from == to {
            return Err(cycle);
        }
        let lower = self.ord(to);
        let upper = self.ord(from);
        if upper < lower {
            return Ok(());
        }

        // Forward search: everything reachable from `to` inside the region.
        let mut forward = vec![];
        let mut visited = HashSet::default();
        let mut stack = vec![to];
        visited.insert(to);
        while let Some(node) = stack.pop() {
            forward.push(node);
            for &next in &nodes[node.index()].dependents {
                if next == from {
                    return Err(cycle);
                }
                if self.ord(next) < upper && visited.insert(next) {
                    stack.push(next);
                }
            }
        }

        // Backward search: everything reaching `from` inside the region.
        let mut backward = vec![];
        let mut visited = HashSet::default();
        stack.push(from);
        visited.insert(from);
        while let Some(node) = stack.pop() {
            backward.push(node);
            for &prev in &nodes[node.index()].dependencies {
                if self.ord(prev) > lower && visited.insert(prev) {
                    stack.push(prev);
                }
            }
        }

        forward.sort_unstable_by_key(|&node| self.ord(node));
        backward.sort_unstable_by_key(|&node| self.ord(node));
        let mut pool: Vec<u32> = backward
            .iter()
            .chain(&forward)
            .map(|&node| self.ord(node))
            .collect();
        pool.sort_unstable();
        for (node, position) in backward.into_iter().chain(forward).zip(pool) {
            self.ord[node.index()] = position;
        }
        Ok(())
    }
}

/// Final topological order and per-node depth of a finished graph.
pub(crate) struct Plan {
    pub(crate) order: Vec<NodeIndex>,
    pub(crate) depth: Vec<u32>,
}

/// Re-derive a topological order from scratch and compute depths.
///
/// Kahn-like processing with progress detection: a candidate whose parents are
/// not all placed yet is deferred, and if nothing gets placed for as many
/// iterations as the queue held at the last placement, the remaining subgraph
/// is cyclic.
pub(crate) fn plan<C: Config>(nodes: &[Node<C>]) -> Result<Plan, BuildError> {
    let mut depth: Vec<Option<u32>> = vec![None; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    // Phase 1: roots go first with depth 0.
    for (idx, node) in nodes.iter().enumerate() {
        if node.dependencies.is_empty() {
            depth[idx] = Some(0);
            order.push(NodeIndex::from_usize(idx));
        }
    }

    // Phase 2: seed the worklist with children of the roots.
    let max_cap = nodes.len() - order.len();
    let mut pending_queue = VecDeque::with_capacity(max_cap);
    let mut pending_set = HashSet::with_capacity_and_hasher(max_cap, FxBuildHasher);
    for &root in &order {
        for &child in &nodes[root.index()].dependents {
            if pending_set.insert(child) {
                pending_queue.push_back(child);
            }
        }
    }

    // Phase 3: place candidates whose parents are all placed.
    let mut last_progress_iter = 0usize;
    let mut last_progress_queue_len = pending_queue.len();
    let mut iter = 0usize;
    'process_pending: while let Some(candidate) = pending_queue.pop_front() {
        pending_set.remove(&candidate);
        if iter - last_progress_iter >= last_progress_queue_len {
            break;
        }
        iter += 1;
        let mut candidate_depth = 1;
        for parent in &nodes[candidate.index()].dependencies {
            let Some(parent_depth) = depth[parent.index()] else {
                continue 'process_pending;
            };
            candidate_depth = candidate_depth.max(parent_depth + 1);
        }
        depth[candidate.index()] = Some(candidate_depth);
        order.push(candidate);
        for &child in &nodes[candidate.index()].dependents {
            if depth[child.index()].is_none() && pending_set.insert(child) {
                pending_queue.push_back(child);
            }
        }
        last_progress_iter = iter;
        last_progress_queue_len = pending_queue.len();
    }

    if order.len() != nodes.len() {
        // Report one edge inside the unplaced remainder.
        let cycle = nodes.iter().enumerate().find_map(|(idx, node)| {
            if depth[idx].is_some() {
                return None;
            }
            node.dependencies
                .iter()
                .find(|parent| depth[parent.index()].is_none())
                .map(|&parent| BuildError::CyclicDependency {
                    node_a: parent,
                    node_b: NodeIndex::from_usize(idx),
                })
        });
        return Err(cycle.unwrap_or(BuildError::Empty));
    }

    Ok(Plan {
        order,
        depth: depth.into_iter().map(|depth| depth.unwrap_or(0)).collect(),
    })
}
