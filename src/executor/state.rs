use crate::{
    config::Config,
    dag::ValueSource,
    error::{Cause, Failure, SchedulerError},
    propagate::{self, ErrorGraph},
    runtime::{Inputs, TaskContext},
    scheduler::{Scheduler, TaskResult},
    stats::ExecTime,
    sync::*,
    task::{FailureKind, Operation, Task, TaskParts, TaskPriority, TaskState},
    types::{HashMap, NodeIndex, Span, SyncUnsafeCell, TaskId},
    utils::panic_message,
};
use core::{num::NonZeroU64, time::Duration};
use derive_more::Debug;
use parking_lot::Mutex;
use std::{
    collections::BTreeMap,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
    time::Instant,
};
use tracing::warn;

const PENDING: u64 = 0;
const RUNNING: u64 = 1;
const COMPLETED: u64 = 2;
const FAILED: u64 = 3;
const STATE_MASK: u64 = 0xFF;
const ORIGIN_SHIFT: u32 = 8;

/// Decoded value of a [`StatusCell`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Status {
    Pending,
    Running,
    Completed,
    /// Failed because of the node (or task) with the given local index.
    Failed(u32),
}

/// Lifecycle word of one task: the state in the low byte and, for `Failed`,
/// the local index of the origin above it.
///
/// Every terminal store is `Release` and every load that may lead to reading
/// the output slot is `Acquire`, so a reader that observes a terminal state
/// also observes the output written before it.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU64);

impl StatusCell {
    pub(super) fn new() -> Self {
        Self(AtomicU64::new(PENDING))
    }

    pub(crate) fn load(&self) -> Status {
        let raw = self.0.load(Ordering::Acquire);
        match raw & STATE_MASK {
            PENDING => Status::Pending,
            RUNNING => Status::Running,
            COMPLETED => Status::Completed,
            _ => Status::Failed((raw >> ORIGIN_SHIFT) as u32),
        }
    }

    /// `Pending → Running`. Exactly one caller wins.
    fn try_claim(&self) -> bool {
        self.0
            .compare_exchange(PENDING, RUNNING, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn complete(&self) {
        self.0.store(COMPLETED, Ordering::Release);
    }

    fn fail(&self, origin: u32) {
        self.0
            .store(FAILED | (u64::from(origin) << ORIGIN_SHIFT), Ordering::Release);
    }

    /// `Pending → Failed(origin)`. Loses against a claim or another failure.
    fn try_fail(&self, origin: u32) -> bool {
        self.0
            .compare_exchange(
                PENDING,
                FAILED | (u64::from(origin) << ORIGIN_SHIFT),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }
}

pub(crate) type Outcome<C> = Result<<C as Config>::Value, Cause<<C as Config>::Error>>;

pub(crate) type OutputSlot<C> = SyncUnsafeCell<Option<Outcome<C>>>;

/// # Safety
///
/// The caller must be the only writer: the task was claimed by this thread and
/// its terminal status has not been published yet.
unsafe fn write_output<C: Config>(slot: &OutputSlot<C>, outcome: Outcome<C>) {
    // SAFETY: Exclusive access is guaranteed by the caller; nobody reads the
    // slot before the terminal status is published.
    unsafe {
        slot.get_mut().with(|ptr| *ptr = Some(outcome));
    }
}

/// # Safety
///
/// The terminal status of the owning task must have been observed with
/// `Acquire` ordering (directly, or through the readiness protocol).
unsafe fn read_output<C: Config>(slot: &OutputSlot<C>) -> Option<&Outcome<C>> {
    // SAFETY: The slot is written once before its terminal status is
    // published and never again, so shared references are sound.
    unsafe { slot.get().with(|ptr| (*ptr).as_ref()) }
}

fn state_of(status: Status, local: u32, id_of: impl FnOnce(u32) -> TaskId) -> TaskState {
    match status {
        Status::Pending => TaskState::Pending,
        Status::Running => TaskState::Running,
        Status::Completed => TaskState::Completed,
        Status::Failed(origin) if origin == local => TaskState::Failed(FailureKind::Local),
        Status::Failed(origin) => TaskState::Failed(FailureKind::Propagated {
            origin: id_of(origin),
        }),
    }
}

/// Per-node mutable state, cache-line aligned to avoid false sharing between
/// workers completing neighbouring nodes.
#[derive(Debug)]
#[repr(align(128))]
pub(crate) struct NodeSlot<C: Config> {
    pub(super) status: StatusCell,
    /// Number of parents that haven't completed yet.
    pub(super) parents_left: AtomicU32,
    #[debug(skip)]
    pub(super) output: OutputSlot<C>,
    pub(super) elapsed: ExecTime,
}

#[derive(Debug)]
pub(crate) enum LayoutKind<C: Config> {
    Task,
    Value(ValueSource<C>),
    Control,
}

/// Per-node immutable scheduling metadata.
#[derive(Debug)]
pub(crate) struct NodeLayout<C: Config> {
    pub(super) kind: LayoutKind<C>,
    pub(super) inputs: Vec<NodeIndex>,
    /// Downstream nodes having the current node as their only parent. They are
    /// ready as soon as the current node completes, without synchronization on
    /// a counter.
    pub(super) owned_children: Vec<NodeIndex>,
    /// Downstream nodes with multiple parents.
    pub(super) shared_children: Vec<NodeIndex>,
    pub(super) label: Option<String>,
    pub(super) span: Option<Span>,
    pub(super) priority: TaskPriority,
}

/// One submitted [`Dag`](crate::dag::Dag) being executed.
///
/// Node `i` has task identifier `first + i`.
#[derive(Debug)]
pub(crate) struct DagRun<C: Config> {
    pub(super) first: TaskId,
    pub(super) slots: Vec<NodeSlot<C>>,
    pub(super) layouts: Vec<NodeLayout<C>>,
    #[debug(skip)]
    pub(super) operations: Vec<Mutex<Option<Operation<C>>>>,
    pub(super) output: NodeIndex,
}

impl<C: Config> DagRun<C> {
    pub(crate) fn first(&self) -> TaskId {
        self.first
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn output(&self) -> NodeIndex {
        self.output
    }

    pub(crate) fn task_id(&self, node: NodeIndex) -> TaskId {
        self.first.offset(node.0)
    }

    /// Node of `id`, if the identifier belongs to this run.
    pub(crate) fn node_of(&self, id: TaskId) -> Option<NodeIndex> {
        let offset = id.get().checked_sub(self.first.get())?;
        let offset = u32::try_from(offset).ok()?;
        ((offset as usize) < self.len()).then_some(NodeIndex(offset))
    }

    pub(crate) fn label(&self, node: NodeIndex) -> Option<&str> {
        self.layouts[node.index()].label.as_deref()
    }

    pub(crate) fn span(&self, node: NodeIndex) -> Option<Span> {
        self.layouts[node.index()].span
    }

    pub(crate) fn priority(&self, node: NodeIndex) -> TaskPriority {
        self.layouts[node.index()].priority
    }

    pub(crate) fn elapsed(&self, node: NodeIndex) -> Option<Duration> {
        self.slots[node.index()].elapsed.get()
    }

    pub(crate) fn children(&self, node: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        let layout = &self.layouts[node.index()];
        layout
            .owned_children
            .iter()
            .chain(&layout.shared_children)
            .copied()
    }

    /// Whether `to` is reachable from `from` along dependency edges.
    pub(crate) fn reaches(&self, from: NodeIndex, to: NodeIndex) -> bool {
        let mut seen = vec![false; self.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            for child in self.children(node) {
                if !seen[child.index()] {
                    seen[child.index()] = true;
                    stack.push(child);
                }
            }
        }
        false
    }

    pub(crate) fn mark_failed(&self, node: NodeIndex, origin: NodeIndex) -> bool {
        self.slots[node.index()].status.try_fail(origin.0)
    }

    pub(crate) fn failed_by(&self, node: NodeIndex, origin: NodeIndex) -> bool {
        self.slots[node.index()].status.load() == Status::Failed(origin.0)
    }

    pub(crate) fn state(&self, node: NodeIndex) -> TaskState {
        let status = self.slots[node.index()].status.load();
        state_of(status, node.0, |origin| self.first.offset(origin))
    }

    /// Push every root as ready and resolve the value and control nodes that
    /// need no execution.
    pub(crate) fn start(self: &Arc<Self>, ready: &mut Vec<Job<C>>) {
        let mut inline = vec![];
        for (idx, slot) in self.slots.iter().enumerate() {
            if slot.parents_left.load(Ordering::Relaxed) == 0 {
                self.on_ready(NodeIndex::from_usize(idx), ready, &mut inline);
            }
        }
        self.resolve_inline(inline, ready);
    }

    fn on_ready(
        self: &Arc<Self>,
        node: NodeIndex,
        ready: &mut Vec<Job<C>>,
        inline: &mut Vec<NodeIndex>,
    ) {
        match self.layouts[node.index()].kind {
            LayoutKind::Task => ready.push(Job::Node(Arc::clone(self), node)),
            LayoutKind::Value(_) | LayoutKind::Control => inline.push(node),
        }
    }

    fn resolve_inline(self: &Arc<Self>, mut inline: Vec<NodeIndex>, ready: &mut Vec<Job<C>>) {
        while let Some(node) = inline.pop() {
            if !self.slots[node.index()].status.try_claim() {
                continue;
            }
            let output = match &self.layouts[node.index()].kind {
                LayoutKind::Value(ValueSource::Constant(value)) => Some(Ok(value.clone())),
                LayoutKind::Value(ValueSource::Produced(producer)) => {
                    // SAFETY: The producer is a parent of this node, so it has
                    // completed and its output is visible through the readiness
                    // protocol.
                    let value = unsafe { self.value(*producer) };
                    value.cloned().map(Ok)
                }
                LayoutKind::Control | LayoutKind::Task => None,
            };
            self.finish(node, output, ready, &mut inline);
        }
    }

    /// Claim a task node for execution. Returns `None` if the node was already
    /// claimed or failed upstream.
    pub(crate) fn claim(&self, node: NodeIndex) -> Option<Operation<C>> {
        if !self.slots[node.index()].status.try_claim() {
            return None;
        }
        self.operations[node.index()].lock().take()
    }

    /// # Safety
    ///
    /// `node` must be completed and its status observed as described on
    /// [`read_output`].
    unsafe fn value(&self, node: NodeIndex) -> Option<&C::Value> {
        // SAFETY: Forwarded to the caller.
        match unsafe { read_output::<C>(&self.slots[node.index()].output) } {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Positional inputs of a claimed task node.
    pub(crate) fn inputs(&self, node: NodeIndex) -> Inputs<'_, C> {
        let values = self.layouts[node.index()]
            .inputs
            .iter()
            // SAFETY: A claimed node became ready only after all its parents
            // completed; their outputs are visible through the readiness
            // protocol.
            .filter_map(|&input| unsafe { self.value(input) })
            .collect();
        Inputs::new(values)
    }

    /// Publish the result of a claimed task node and release or fail its
    /// dependents. Returns the number of dependents marked failed.
    pub(crate) fn complete(
        self: &Arc<Self>,
        node: NodeIndex,
        outcome: Outcome<C>,
        ready: &mut Vec<Job<C>>,
    ) -> usize {
        let failed = outcome.is_err();
        let mut inline = vec![];
        let marked = self.finish(node, Some(outcome), ready, &mut inline);
        self.resolve_inline(inline, ready);
        if failed { marked } else { 0 }
    }

    fn finish(
        self: &Arc<Self>,
        node: NodeIndex,
        output: Option<Outcome<C>>,
        ready: &mut Vec<Job<C>>,
        inline: &mut Vec<NodeIndex>,
    ) -> usize {
        let slot = &self.slots[node.index()];
        let failed = matches!(output, Some(Err(_)));
        if let Some(output) = output {
            // SAFETY: The node was claimed by this thread and its terminal
            // status is published below.
            unsafe { write_output::<C>(&slot.output, output) };
        }
        if failed {
            slot.status.fail(node.0);
            return propagate::propagate(self, node);
        }
        slot.status.complete();

        let layout = &self.layouts[node.index()];
        for &child in &layout.owned_children {
            self.on_ready(child, ready, inline);
        }
        if !layout.shared_children.is_empty() {
            fence(Ordering::Release);
        }
        let mut promoted = false;
        for &child in &layout.shared_children {
            let counter = &self.slots[child.index()].parents_left;
            if counter.fetch_sub(1, Ordering::Relaxed) == 1 {
                if !promoted {
                    fence(Ordering::Acquire);
                    promoted = true;
                }
                self.on_ready(child, ready, inline);
            }
        }
        0
    }

    /// Result of `node` once terminal.
    pub(crate) fn outcome(&self, node: NodeIndex) -> Option<TaskResult<C>> {
        let id = self.task_id(node);
        match self.slots[node.index()].status.load() {
            Status::Pending | Status::Running => None,
            Status::Completed => Some(
                // SAFETY: `Completed` was observed with `Acquire`.
                unsafe { self.value(node) }
                    .cloned()
                    .ok_or(SchedulerError::NoValue(id)),
            ),
            Status::Failed(origin) => {
                let origin = NodeIndex(origin);
                // SAFETY: The origin's failure was published with `Release`
                // before propagation marked this node, and this node's state
                // was observed with `Acquire`.
                let cause = match unsafe { read_output::<C>(&self.slots[origin.index()].output) } {
                    Some(Err(cause)) => cause.clone(),
                    _ => return None,
                };
                let failure = Failure::new(self.task_id(origin), Some(origin), cause)
                    .with_graph(ErrorGraph::collect(self, origin));
                Some(Err(SchedulerError::Task(failure)))
            }
        }
    }
}

/// An ad-hoc task created by `spawn`.
#[derive(Debug)]
pub(crate) struct TaskCell<C: Config> {
    id: TaskId,
    label: Option<String>,
    priority: TaskPriority,
    status: StatusCell,
    elapsed: ExecTime,
    #[debug(skip)]
    operation: Mutex<Option<Operation<C>>>,
    #[debug(skip)]
    output: OutputSlot<C>,
}

impl<C: Config> TaskCell<C> {
    pub(crate) fn new(id: TaskId, task: Task<C>) -> Self {
        let TaskParts {
            name,
            priority,
            operation,
            ..
        } = task.into_parts();
        Self {
            id,
            label: name,
            priority,
            status: StatusCell::new(),
            elapsed: ExecTime::default(),
            operation: Mutex::new(Some(operation)),
            output: OutputSlot::<C>::new(None),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn priority(&self) -> TaskPriority {
        self.priority
    }

    fn claim(&self) -> Option<Operation<C>> {
        if !self.status.try_claim() {
            return None;
        }
        self.operation.lock().take()
    }

    fn complete(&self, outcome: Outcome<C>) {
        let failed = outcome.is_err();
        // SAFETY: The task was claimed by this thread and its terminal status
        // is published below.
        unsafe { write_output::<C>(&self.output, outcome) };
        if failed {
            self.status.fail(0);
        } else {
            self.status.complete();
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        state_of(self.status.load(), 0, |_| self.id)
    }

    pub(crate) fn outcome(&self) -> Option<TaskResult<C>> {
        match self.status.load() {
            Status::Pending | Status::Running => None,
            Status::Completed | Status::Failed(_) => {
                // SAFETY: The terminal status was observed with `Acquire`.
                match unsafe { read_output::<C>(&self.output) }? {
                    Ok(value) => Some(Ok(value.clone())),
                    Err(cause) => Some(Err(SchedulerError::Task(Failure::new(
                        self.id,
                        None,
                        cause.clone(),
                    )))),
                }
            }
        }
    }
}

/// Anything an identifier can refer to.
#[derive(Debug)]
pub(crate) enum TaskRef<C: Config> {
    Task(Arc<TaskCell<C>>),
    Node(Arc<DagRun<C>>, NodeIndex),
}

impl<C: Config> TaskRef<C> {
    pub(crate) fn id(&self) -> TaskId {
        match self {
            Self::Task(cell) => cell.id(),
            Self::Node(run, node) => run.task_id(*node),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        match self {
            Self::Task(cell) => cell.state(),
            Self::Node(run, node) => run.state(*node),
        }
    }

    /// Result once terminal, `None` while pending or running.
    pub(crate) fn outcome(&self) -> Option<TaskResult<C>> {
        match self {
            Self::Task(cell) => cell.outcome(),
            Self::Node(run, node) => run.outcome(*node),
        }
    }

    /// Execution time once the closure returned, `None` if it never ran.
    pub(crate) fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::Task(cell) => cell.elapsed.get(),
            Self::Node(run, node) => run.elapsed(*node),
        }
    }
}

/// What happened when a [`Job`] was dispatched.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Executed {
    /// Already claimed elsewhere or failed upstream; nothing ran.
    Skipped,
    Completed { elapsed: Duration },
    /// Failed; `propagated` dependents were marked.
    Failed { propagated: usize, elapsed: Duration },
}

/// Unit of work sitting in a run queue.
#[derive(Debug)]
pub(crate) enum Job<C: Config> {
    Spawned(Arc<TaskCell<C>>),
    Node(Arc<DagRun<C>>, NodeIndex),
}

fn run_operation<C: Config>(
    operation: Operation<C>,
    cx: &TaskContext<'_, C>,
    time: &ExecTime,
) -> (Outcome<C>, Duration) {
    let started = Instant::now();
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| operation(cx))) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Cause::Error(Arc::new(err))),
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(task = %cx.id(), message, "scheduler: task panicked");
            Err(Cause::Panic(Arc::from(message)))
        }
    };
    let elapsed = started.elapsed();
    time.record(elapsed);
    (outcome, elapsed)
}

impl<C: Config> Job<C> {
    pub(crate) fn priority(&self) -> TaskPriority {
        match self {
            Self::Spawned(cell) => cell.priority(),
            Self::Node(run, node) => run.priority(*node),
        }
    }

    /// Whether `target` cannot resolve before this job runs: the job is the
    /// target itself or one of its ancestors in the same graph.
    pub(crate) fn feeds(&self, target: &TaskRef<C>) -> bool {
        match (self, target) {
            (Self::Spawned(cell), TaskRef::Task(target)) => Arc::ptr_eq(cell, target),
            (Self::Node(run, node), TaskRef::Node(target_run, target)) => {
                Arc::ptr_eq(run, target_run) && run.reaches(*node, *target)
            }
            _ => false,
        }
    }

    /// Claim and run the job on the current thread, appending newly ready
    /// jobs to `ready`.
    pub(crate) fn execute(self, scheduler: &dyn Scheduler<C>, ready: &mut Vec<Job<C>>) -> Executed {
        match self {
            Self::Spawned(cell) => {
                let Some(operation) = cell.claim() else {
                    return Executed::Skipped;
                };
                let cx = TaskContext::new(scheduler, cell.id(), Inputs::new(vec![]), None);
                let (outcome, elapsed) = run_operation(operation, &cx, &cell.elapsed);
                let failed = outcome.is_err();
                cell.complete(outcome);
                if failed {
                    Executed::Failed {
                        propagated: 0,
                        elapsed,
                    }
                } else {
                    Executed::Completed { elapsed }
                }
            }
            Self::Node(run, node) => {
                let Some(operation) = run.claim(node) else {
                    return Executed::Skipped;
                };
                let (outcome, elapsed) = {
                    let cx = TaskContext::new(
                        scheduler,
                        run.task_id(node),
                        run.inputs(node),
                        Some((&*run, node)),
                    );
                    run_operation(operation, &cx, &run.slots[node.index()].elapsed)
                };
                if outcome.is_err() {
                    let propagated = run.complete(node, outcome, ready);
                    Executed::Failed {
                        propagated,
                        elapsed,
                    }
                } else {
                    run.complete(node, outcome, ready);
                    Executed::Completed { elapsed }
                }
            }
        }
    }
}

/// Identifier source of one scheduler. Identifiers start at 1 and are never
/// reused.
#[derive(Debug)]
pub(crate) struct IdAllocator(std::sync::atomic::AtomicU64);

impl Default for IdAllocator {
    fn default() -> Self {
        Self(std::sync::atomic::AtomicU64::new(1))
    }
}

impl IdAllocator {
    /// Reserve `count` contiguous identifiers and return the first.
    pub(crate) fn reserve(&self, count: u32) -> TaskId {
        let first = self
            .0
            .fetch_add(u64::from(count.max(1)), std::sync::atomic::Ordering::Relaxed);
        TaskId::from_raw(NonZeroU64::new(first).unwrap_or(NonZeroU64::MAX))
    }
}

/// Identifier → task lookup of one scheduler.
///
/// Ad-hoc tasks and DAG runs are both kept until released, so awaiting them
/// stays idempotent until then.
#[derive(Debug)]
pub(crate) struct Registry<C: Config> {
    tasks: HashMap<TaskId, Arc<TaskCell<C>>>,
    dags: BTreeMap<TaskId, Arc<DagRun<C>>>,
}

impl<C: Config> Default for Registry<C> {
    fn default() -> Self {
        Self {
            tasks: HashMap::default(),
            dags: BTreeMap::new(),
        }
    }
}

impl<C: Config> Registry<C> {
    pub(crate) fn insert_task(&mut self, cell: Arc<TaskCell<C>>) {
        self.tasks.insert(cell.id(), cell);
    }

    pub(crate) fn insert_dag(&mut self, run: Arc<DagRun<C>>) {
        self.dags.insert(run.first(), run);
    }

    pub(crate) fn remove_task(&mut self, id: TaskId) -> Option<Arc<TaskCell<C>>> {
        self.tasks.remove(&id)
    }

    pub(crate) fn remove_dag(&mut self, first: TaskId) -> Option<Arc<DagRun<C>>> {
        self.dags.remove(&first)
    }

    pub(crate) fn lookup(&self, id: TaskId) -> Option<TaskRef<C>> {
        if let Some(cell) = self.tasks.get(&id) {
            return Some(TaskRef::Task(Arc::clone(cell)));
        }
        let (_, run) = self.dags.range(..=id).next_back()?;
        let node = run.node_of(id)?;
        Some(TaskRef::Node(Arc::clone(run), node))
    }
}

#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use crate::{dag::DagBuilder, error::Cause};
    use core::fmt;

    #[derive(Debug)]
    struct Cfg;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl Config for Cfg {
        type Value = u32;
        type Error = Boom;
    }

    /// a → {b, c} → d
    fn diamond() -> Arc<DagRun<Cfg>> {
        let mut b = DagBuilder::<Cfg>::new();
        let a = b.add_task_node(Task::ready(1), &[]).unwrap();
        let l = b.add_task_node(Task::ready(2), &[a]).unwrap();
        let r = b.add_task_node(Task::ready(3), &[a]).unwrap();
        b.add_task_node(Task::ready(4), &[l, r]).unwrap();
        Arc::new(DagRun::new(b.finish().unwrap(), TaskId::from_raw(NonZeroU64::MIN)))
    }

    fn node_of(job: &Job<Cfg>) -> NodeIndex {
        match job {
            Job::Node(_, node) => *node,
            Job::Spawned(_) => unreachable!(),
        }
    }

    #[test]
    fn shared_child_released_exactly_once() {
        loom::model(|| {
            let run = diamond();
            let mut ready = vec![];
            run.start(&mut ready);
            let a = node_of(&ready.pop().unwrap());
            run.claim(a).unwrap();
            run.complete(a, Ok(1), &mut ready);
            assert_eq!(ready.len(), 2);

            let handles: Vec<_> = ready
                .drain(..)
                .map(|job| {
                    let run = Arc::clone(&run);
                    let node = node_of(&job);
                    loom::thread::spawn(move || {
                        let mut ready = vec![];
                        run.claim(node).unwrap();
                        run.complete(node, Ok(node.0 * 10), &mut ready);
                        ready.iter().map(node_of).collect::<Vec<_>>()
                    })
                })
                .collect();
            let released: Vec<NodeIndex> = handles
                .into_iter()
                .flat_map(|handle| handle.join().unwrap())
                .collect();
            assert_eq!(released, vec![NodeIndex(3)]);
            assert_eq!(run.inputs(NodeIndex(3)).iter().copied().collect::<Vec<_>>(), [10, 20]);
        });
    }

    #[test]
    fn failure_wins_against_sibling_completion() {
        loom::model(|| {
            let run = diamond();
            let mut ready = vec![];
            run.start(&mut ready);
            run.claim(NodeIndex(0)).unwrap();
            ready.clear();
            run.complete(NodeIndex(0), Ok(1), &mut ready);

            let failing = {
                let run = Arc::clone(&run);
                loom::thread::spawn(move || {
                    let mut ready = vec![];
                    run.claim(NodeIndex(1)).unwrap();
                    run.complete(NodeIndex(1), Err(Cause::Error(Arc::new(Boom))), &mut ready);
                    assert!(ready.is_empty());
                })
            };
            let mut released = vec![];
            run.claim(NodeIndex(2)).unwrap();
            run.complete(NodeIndex(2), Ok(3), &mut released);
            failing.join().unwrap();

            // Whether or not the sibling released it, the join node never runs.
            for job in &released {
                assert!(run.claim(node_of(job)).is_none());
            }
            assert_eq!(
                run.state(NodeIndex(3)),
                TaskState::Failed(FailureKind::Propagated {
                    origin: run.task_id(NodeIndex(1))
                })
            );
        });
    }
}
