//! Automatic-parallelism scheduling core.
//!
//! Each function activation of a compiled program is lowered into a
//! dependency graph ([`dag::Dag`]) whose nodes are tasks, values and control
//! points. The graph is handed to a scheduler that runs every node as soon as
//! its dependencies are satisfied:
//! - Independent computations run in parallel on a work-stealing pool, or
//!   interleave deterministically on a single cooperative worker.
//! - Side effects on the same resource are serialized by `Control` edges the
//!   builder derives from the statements that touch it.
//! - A failing task marks all of its transitive dependents failed without
//!   running them, and every awaiter observes the same shared root cause.
//! - Timeouts, breakpoints, stack overflows and memory violations raised from
//!   any thread halt dispatch at the next node boundary, never mid-node.
//!
//! Key modules:
//! - `config`: binds value and error types via the `Config` trait, and holds
//!   runtime knobs.
//! - `dag`: graph model, incremental builder with cycle rejection, and
//!   structural analysis.
//! - `scheduler`: the `Scheduler` trait implemented by both variants, plus
//!   `build` to pick one from configuration.
//! - `executor`: the cooperative and work-stealing schedulers and the
//!   per-node completion protocol they share.
//! - `interrupt`: the lock-free interrupt register and its handle.
//!
//! Quick start:
//! 1. Implement `Config` with your value and error types.
//! 2. Build a graph with `DagBuilder` (raw nodes and edges, or `Statement`s).
//! 3. Create a scheduler with `scheduler::build` and call `run_dag`.
//!
//! When a node runs, all of its dependencies have completed and published
//! their outputs with the appropriate happens-before relations: children with
//! a single parent are released directly, children with several parents
//! through a counter guarded by Release/Acquire fences.

/// Public interface to configure schedulers.
///
/// Exposes the `Config` trait binding value and error types, the
/// `ConcurrencyLayer` selector and `SchedulerConfig` knobs.
pub mod config;
/// Dependency graphs of function activations.
///
/// Contains the node/edge model, `DagBuilder` with incremental topological
/// ordering (cycles are rejected at insertion), the statement front-end that
/// derives resource serialization, and graph analysis helpers.
pub mod dag;
/// Error types for graph building, scheduler setup and task execution.
pub mod error;
/// The scheduler variants.
pub mod executor;
/// Interrupt register, handle and timeout watchdog.
pub mod interrupt;
/// Failure propagation across dependents and its diagnostic subgraph.
pub mod propagate;
/// Hooks available to running tasks.
pub mod runtime;
/// The `Scheduler` integration surface.
pub mod scheduler;
/// Scheduler counters.
pub mod stats;
mod sync;
/// Tasks and their lifecycle.
pub mod task;
/// Core types used across the crate (identifiers, spans, cell wrapper).
pub mod types;
mod utils;

pub use crate::{
    config::{ConcurrencyLayer, Config, SchedulerConfig},
    dag::{Dag, DagBuilder, EdgeKind, ResourceRef, Statement},
    error::{BuildError, Cause, Failure, SchedulerError, SchedulerSetupError},
    interrupt::{Interrupt, InterruptHandle},
    runtime::{DagHandle, TaskContext},
    scheduler::{Scheduler, TaskResult},
    task::{Task, TaskPriority, TaskState},
    types::{NodeIndex, Span, TaskId},
};
