use crate::{
    config::Config,
    dag::{
        Dag, Edge, EdgeKind, Node, NodeKind, ValueSource,
        order::{self, Plan, TopoMarker},
    },
    error::BuildError,
    task::{Task, TaskParts},
    types::{HashSet, IndexMap, NodeIndex, Span},
};
use derive_more::Debug;
use tracing::{debug, trace};

/// Reference to a side-effecting resource touched by a statement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    /// A resource reached through a named binding. Resource identity is the
    /// node that defined the binding, so two names for the same underlying
    /// object (see [`DagBuilder::alias`]) are treated as different resources.
    Binding(String),
    /// A literal resource such as an inline constant. Every use is treated as
    /// independent and never serialized.
    Literal(String),
}

/// One source-level statement: a task, the names it reads, the name it binds
/// and the resources it touches.
#[must_use]
#[derive(Debug)]
pub struct Statement<C: Config> {
    task: Task<C>,
    inputs: Vec<String>,
    binding: Option<String>,
    resources: Vec<ResourceRef>,
    after: Vec<(NodeIndex, EdgeKind)>,
}

impl<C: Config> Statement<C> {
    /// A statement running `task`.
    pub fn new(task: Task<C>) -> Self {
        Self {
            task,
            inputs: vec![],
            binding: None,
            resources: vec![],
            after: vec![],
        }
    }

    /// Read the value bound to `name` as the next positional input.
    pub fn input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    /// Bind the statement's result to `name`, shadowing any previous binding.
    pub fn bind(mut self, name: impl Into<String>) -> Self {
        self.binding = Some(name.into());
        self
    }

    /// Declare a side effect on `resource`.
    pub fn touches(mut self, resource: ResourceRef) -> Self {
        self.resources.push(resource);
        self
    }

    /// Shorthand for `touches(ResourceRef::Binding(name))`.
    pub fn uses(self, name: impl Into<String>) -> Self {
        self.touches(ResourceRef::Binding(name.into()))
    }

    /// Add an explicit edge from `node` to this statement's node.
    pub fn after(mut self, node: NodeIndex, kind: EdgeKind) -> Self {
        self.after.push((node, kind));
        self
    }
}

/// Incremental constructor of a [`Dag`].
///
/// Every edge insertion keeps a running topological order up to date, so a
/// cycle is rejected at the offending call and leaves the graph unchanged.
/// `Data` edges must additionally run from an earlier-inserted node to a later
/// one.
///
/// Besides raw node/edge insertion the builder keeps a scope table of names
/// (for [`Statement`]s) and, per resource, the last node that touched it:
/// consecutive statements touching the same resource are chained with
/// `Control` edges.
#[must_use]
#[derive(Debug)]
pub struct DagBuilder<C: Config> {
    nodes: Vec<Node<C>>,
    edges: Vec<Edge>,
    edge_set: HashSet<Edge>,
    marker: TopoMarker,
    scope: IndexMap<String, NodeIndex>,
    last_touch: IndexMap<NodeIndex, NodeIndex>,
    output: Option<NodeIndex>,
}

impl<C: Config> Default for DagBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Config> DagBuilder<C> {
    /// An empty builder.
    pub fn new() -> Self {
        Self {
            nodes: vec![],
            edges: vec![],
            edge_set: HashSet::default(),
            marker: TopoMarker::default(),
            scope: IndexMap::default(),
            last_touch: IndexMap::default(),
            output: None,
        }
    }

    /// Number of nodes added so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn check(&self, node: NodeIndex) -> Result<&Node<C>, BuildError> {
        self.nodes.get(node.index()).ok_or(BuildError::UnknownNode(node))
    }

    fn check_value(&self, node: NodeIndex) -> Result<(), BuildError> {
        if self.check(node)?.kind.has_value() {
            Ok(())
        } else {
            Err(BuildError::NoValue(node))
        }
    }

    fn push_node(&mut self, node: Node<C>) -> NodeIndex {
        let idx = NodeIndex::from_usize(self.nodes.len());
        self.nodes.push(node);
        self.marker.push();
        idx
    }

    /// Insert an edge; returns whether it was new.
    fn link(&mut self, from: NodeIndex, to: NodeIndex, kind: EdgeKind) -> Result<bool, BuildError> {
        self.check(from)?;
        self.check(to)?;
        if kind == EdgeKind::Data {
            self.check_value(from)?;
            if from >= to {
                return Err(if from == to {
                    BuildError::CyclicDependency {
                        node_a: from,
                        node_b: to,
                    }
                } else {
                    BuildError::DataEdgeOutOfOrder { from, to }
                });
            }
        }
        let edge = Edge { from, to, kind };
        if self.edge_set.contains(&edge) {
            return Ok(false);
        }
        self.marker.insert_edge(&self.nodes, from, to)?;
        self.edge_set.insert(edge);
        self.edges.push(edge);
        if !self.nodes[to.index()].dependencies.contains(&from) {
            self.nodes[to.index()].dependencies.push(from);
            self.nodes[from.index()].dependents.push(to);
        }
        trace!(%from, %to, %kind, "dag: edge added");
        Ok(true)
    }

    /// Add a task node consuming `inputs` positionally through `Data` edges.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`] or [`BuildError::NoValue`] for a bad input.
    /// Nothing is inserted on error.
    pub fn add_task_node(
        &mut self,
        task: Task<C>,
        inputs: &[NodeIndex],
    ) -> Result<NodeIndex, BuildError> {
        for &input in inputs {
            self.check_value(input)?;
        }
        let TaskParts {
            name,
            span,
            priority,
            operation,
        } = task.into_parts();
        let mut node = Node::new(NodeKind::Task(operation));
        node.label = name;
        node.span = span;
        node.priority = priority;
        node.inputs = inputs.to_vec();
        let idx = self.push_node(node);
        for &input in inputs {
            self.link(input, idx, EdgeKind::Data)?;
        }
        Ok(idx)
    }

    /// Add a value node forwarding the value of `producer`.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`] or [`BuildError::NoValue`] for a bad
    /// producer.
    pub fn add_value_node(&mut self, producer: NodeIndex) -> Result<NodeIndex, BuildError> {
        self.check_value(producer)?;
        let mut node = Node::new(NodeKind::Value(ValueSource::Produced(producer)));
        node.inputs.push(producer);
        let idx = self.push_node(node);
        self.link(producer, idx, EdgeKind::Data)?;
        Ok(idx)
    }

    /// Add a value node holding a literal.
    pub fn add_constant(&mut self, value: C::Value) -> NodeIndex {
        self.push_node(Node::new(NodeKind::Value(ValueSource::Constant(value))))
    }

    /// Add a sequencing point carrying no value.
    pub fn add_control_node(&mut self) -> NodeIndex {
        self.push_node(Node::new(NodeKind::Control))
    }

    /// Add an edge `from -> to`. Re-adding an existing edge of the same kind
    /// is a no-op. A new `Data` edge appends `from` to the positional inputs
    /// of `to`.
    ///
    /// # Errors
    /// - [`BuildError::CyclicDependency`] if the edge would close a cycle.
    /// - [`BuildError::DataEdgeOutOfOrder`] for a `Data` edge against
    ///   insertion order.
    /// - [`BuildError::NoValue`] for a `Data` edge out of a control node.
    /// - [`BuildError::UnknownNode`] for a foreign index.
    ///
    /// The graph is unchanged on error.
    pub fn connect(
        &mut self,
        from: NodeIndex,
        to: NodeIndex,
        kind: EdgeKind,
    ) -> Result<(), BuildError> {
        if self.link(from, to, kind)? && kind == EdgeKind::Data {
            self.nodes[to.index()].inputs.push(from);
        }
        Ok(())
    }

    /// Designate the node whose resolution ends `run_dag`. Defaults to the
    /// last inserted node.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`] or [`BuildError::NoValue`].
    pub fn set_output(&mut self, node: NodeIndex) -> Result<(), BuildError> {
        self.check_value(node)?;
        self.output = Some(node);
        Ok(())
    }

    /// Attach source provenance to a node.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`].
    pub fn set_span(&mut self, node: NodeIndex, span: Span) -> Result<(), BuildError> {
        self.check(node)?;
        self.nodes[node.index()].span = Some(span);
        Ok(())
    }

    /// Attach a diagnostic name to a node.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`].
    pub fn set_label(&mut self, node: NodeIndex, label: impl Into<String>) -> Result<(), BuildError> {
        self.check(node)?;
        self.nodes[node.index()].label = Some(label.into());
        Ok(())
    }

    /// Bind `name` to `node` in the scope table, shadowing any previous
    /// binding.
    ///
    /// # Errors
    /// [`BuildError::UnknownNode`].
    pub fn bind(&mut self, name: impl Into<String>, node: NodeIndex) -> Result<(), BuildError> {
        self.check(node)?;
        self.scope.insert(name.into(), node);
        Ok(())
    }

    /// Node currently bound to `name`.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<NodeIndex> {
        self.scope.get(name).copied()
    }

    /// Add a constant and bind it to `name`.
    pub fn let_constant(&mut self, name: impl Into<String>, value: C::Value) -> NodeIndex {
        let idx = self.add_constant(value);
        self.scope.insert(name.into(), idx);
        idx
    }

    /// Bind `name` to a new value node forwarding the value bound to
    /// `existing`.
    ///
    /// The alias is a distinct resource: side effects through `name` and
    /// through `existing` are not serialized with each other.
    ///
    /// # Errors
    /// [`BuildError::UnboundName`] if `existing` is not bound.
    pub fn alias(
        &mut self,
        name: impl Into<String>,
        existing: &str,
    ) -> Result<NodeIndex, BuildError> {
        let producer = self
            .lookup(existing)
            .ok_or_else(|| BuildError::UnboundName(existing.to_owned()))?;
        let idx = self.add_value_node(producer)?;
        self.scope.insert(name.into(), idx);
        Ok(idx)
    }

    /// Add the node of a statement.
    ///
    /// Inputs are resolved through the scope table. For every
    /// [`ResourceRef::Binding`] a `Control` edge is added from the previous
    /// node touching the same resource (or from the node defining it, for the
    /// first touch). Literal resources add no edges.
    ///
    /// # Errors
    /// [`BuildError::UnboundName`] for an unknown input or resource name,
    /// [`BuildError::UnknownNode`] or [`BuildError::NoValue`] for a bad input
    /// or `after` source. Everything is validated before the node is
    /// inserted, so the builder is unchanged on error.
    pub fn push(&mut self, statement: Statement<C>) -> Result<NodeIndex, BuildError> {
        let Statement {
            task,
            inputs,
            binding,
            resources,
            after,
        } = statement;
        let resolve = |name: &str| {
            self.lookup(name)
                .ok_or_else(|| BuildError::UnboundName(name.to_owned()))
        };
        let inputs = inputs
            .iter()
            .map(|name| resolve(name))
            .collect::<Result<Vec<_>, _>>()?;
        let mut touched = Vec::with_capacity(resources.len());
        for resource in &resources {
            match resource {
                ResourceRef::Binding(name) => {
                    let identity = resolve(name)?;
                    if !touched.contains(&identity) {
                        touched.push(identity);
                    }
                }
                ResourceRef::Literal(literal) => {
                    trace!(literal = literal.as_str(), "dag: literal resource left unserialized");
                }
            }
        }
        for &(from, kind) in &after {
            if kind == EdgeKind::Data {
                self.check_value(from)?;
            } else {
                self.check(from)?;
            }
        }

        let idx = self.add_task_node(task, &inputs)?;
        for identity in touched {
            let previous = self.last_touch.insert(identity, idx).unwrap_or(identity);
            debug!(resource = %identity, %previous, node = %idx, "dag: resource access serialized");
            self.connect(previous, idx, EdgeKind::Control)?;
        }
        for (from, kind) in after {
            self.connect(from, idx, kind)?;
        }
        if let Some(name) = binding {
            self.scope.insert(name, idx);
        }
        Ok(idx)
    }

    /// Validate and freeze the graph.
    ///
    /// # Errors
    /// - [`BuildError::Empty`] for a graph without nodes.
    /// - [`BuildError::NoValue`] if the output node is a control node.
    /// - [`BuildError::CyclicDependency`] if a cycle is found (unreachable
    ///   through the public insertion API).
    pub fn finish(self) -> Result<Dag<C>, BuildError> {
        let Self {
            nodes,
            edges,
            output,
            ..
        } = self;
        let Some(last) = nodes.len().checked_sub(1) else {
            return Err(BuildError::Empty);
        };
        let output = output.unwrap_or(NodeIndex::from_usize(last));
        if !nodes[output.index()].kind.has_value() {
            return Err(BuildError::NoValue(output));
        }
        let Plan { order, depth } = order::plan(&nodes)?;
        debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            critical_path = depth.iter().max().map_or(0, |depth| depth + 1),
            "dag: finished",
        );
        Ok(Dag {
            nodes,
            edges,
            order,
            depth,
            output,
        })
    }
}
