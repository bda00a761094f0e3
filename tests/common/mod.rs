#![allow(dead_code)]

use flowdag::{
    Config, ConcurrencyLayer, Scheduler, SchedulerConfig, Task, TaskContext,
    executor::{CooperativeScheduler, WorkStealingScheduler},
};
use std::{fmt, time::Duration};
use tracing_subscriber::{EnvFilter, fmt as subscriber};

/// Install a test-writer subscriber filtered by `FLOWDAG_LOG`.
pub fn init_tracing() {
    let _ = subscriber()
        .with_env_filter(EnvFilter::from_env("FLOWDAG_LOG"))
        .with_test_writer()
        .try_init();
}

#[derive(Debug)]
pub struct TestConfig;

#[derive(Debug, PartialEq, Eq)]
pub struct TestError(pub &'static str);

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl Config for TestConfig {
    type Value = i64;
    type Error = TestError;
}

pub type Sched = Box<dyn Scheduler<TestConfig>>;

/// Shorthand pinning the closure signature to `TestConfig`.
pub fn task<F>(operation: F) -> Task<TestConfig>
where
    F: FnOnce(&TaskContext<'_, TestConfig>) -> Result<i64, TestError> + Send + 'static,
{
    Task::new(operation)
}

pub fn cooperative() -> Sched {
    Box::new(CooperativeScheduler::<TestConfig>::new())
}

pub fn work_stealing(workers: usize) -> Sched {
    let config = SchedulerConfig::default()
        .with_workers(workers)
        .unwrap()
        .with_idle_park(Duration::from_millis(1))
        .with_layer(ConcurrencyLayer::Transparent);
    Box::new(WorkStealingScheduler::<TestConfig>::new(config).unwrap())
}

/// Both variants, labelled for assertion messages.
pub fn schedulers() -> Vec<(&'static str, Sched)> {
    init_tracing();
    vec![
        ("cooperative", cooperative()),
        ("work-stealing/1", work_stealing(1)),
        ("work-stealing/4", work_stealing(4)),
    ]
}
