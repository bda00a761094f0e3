use crate::error::SchedulerSetupError;
use core::{
    fmt::{Debug, Display},
    num::NonZeroUsize,
    str::FromStr,
    time::Duration,
};

/// Configuration entry-point for instantiating the scheduler.
///
/// A concrete `Config` binds the value type produced by tasks and the domain
/// error type a failing task reports. Every public generic type in this crate
/// is parameterised by it.
pub trait Config: Sized + 'static {
    /// Value produced by a successful task and flowing along `Data` edges.
    type Value: Clone + Send + Sync + Debug + 'static;
    /// Domain error produced by a failing task. Shared by reference between
    /// every awaiter of the failure.
    type Error: Debug + Display + Send + Sync + 'static;
}

/// Caller-facing concurrency model.
///
/// All three layers drive the same mechanism (a DAG plus annotations); they
/// only select which scheduler variant [`build`](crate::scheduler::build)
/// returns.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ConcurrencyLayer {
    /// Fully sequential: one cooperative worker, deterministic interleaving.
    Sequential,
    /// Concurrency only where the program spawns explicitly.
    Explicit,
    /// Independent computations run in parallel without annotations.
    #[default]
    Transparent,
}

impl FromStr for ConcurrencyLayer {
    type Err = SchedulerSetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(Self::Sequential),
            "explicit" => Ok(Self::Explicit),
            "transparent" => Ok(Self::Transparent),
            other => Err(SchedulerSetupError::InvalidConfig(format!(
                "unknown concurrency layer `{other}`"
            ))),
        }
    }
}

/// Runtime knobs shared by both scheduler variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Number of worker threads of the work-stealing scheduler. Ignored by the
    /// cooperative scheduler.
    pub workers: NonZeroUsize,
    /// How long an idle worker parks before polling the queues again.
    pub idle_park: Duration,
    /// Prefix of worker thread names.
    pub thread_name: String,
    /// Concurrency model selecting the scheduler variant.
    pub layer: ConcurrencyLayer,
}

/// Environment variable overriding [`SchedulerConfig::workers`].
pub const WORKERS_ENV: &str = "FLOWDAG_WORKERS";
/// Environment variable overriding [`SchedulerConfig::layer`].
pub const LAYER_ENV: &str = "FLOWDAG_LAYER";

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            idle_park: Duration::from_millis(2),
            thread_name: "flowdag-worker".to_owned(),
            layer: ConcurrencyLayer::default(),
        }
    }
}

impl SchedulerConfig {
    /// Defaults overridden by `FLOWDAG_WORKERS` and `FLOWDAG_LAYER`.
    ///
    /// # Errors
    /// If a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, SchedulerSetupError> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var(WORKERS_ENV) {
            config.workers = raw.trim().parse().map_err(|_| {
                SchedulerSetupError::InvalidConfig(format!(
                    "{WORKERS_ENV} must be a positive integer, got `{raw}`"
                ))
            })?;
        }
        if let Ok(raw) = std::env::var(LAYER_ENV) {
            config.layer = raw.parse()?;
        }
        Ok(config)
    }

    /// Set the number of worker threads.
    ///
    /// # Errors
    /// If `workers` is zero.
    pub fn with_workers(mut self, workers: usize) -> Result<Self, SchedulerSetupError> {
        self.workers = NonZeroUsize::new(workers).ok_or_else(|| {
            SchedulerSetupError::InvalidConfig("worker count must be positive".to_owned())
        })?;
        Ok(self)
    }

    /// Set the idle park interval.
    #[must_use]
    pub fn with_idle_park(mut self, idle_park: Duration) -> Self {
        self.idle_park = idle_park;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the concurrency layer.
    #[must_use]
    pub fn with_layer(mut self, layer: ConcurrencyLayer) -> Self {
        self.layer = layer;
        self
    }
}
