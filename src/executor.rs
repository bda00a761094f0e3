mod cooperative;
mod setup;
mod state;
mod work_stealing;

/// Single-worker cooperative scheduler.
pub use crate::executor::cooperative::CooperativeScheduler;
/// Multi-worker work-stealing scheduler.
pub use crate::executor::work_stealing::WorkStealingScheduler;
pub(crate) use crate::executor::state::{DagRun, Executed};
