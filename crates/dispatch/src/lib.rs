//! Worker pool dispatch for endpoint calls.
//!
//! Endpoint lifecycle calls (`start`, `stop`, `destroy`) and the I/O an
//! endpoint performs on its own may block on the network for a long time. The
//! scheduler timeline never runs them itself; it hands them to a [`Dispatch`]
//! implementation:
//!
//! - [`PooledDispatch`] runs jobs on a dedicated rayon pool sized for the fleet
//! - [`InlineDispatch`] runs jobs on the calling thread (deterministic tests)
//!
//! # Example
//!
//! ```no_run
//! use fleetload_dispatch::{Dispatch, PooledDispatch, WorkerPoolConfig};
//!
//! let dispatch = PooledDispatch::new(WorkerPoolConfig::for_fleet(2000)).unwrap();
//! dispatch.spawn(Box::new(|| println!("runs on a worker")));
//! ```

use fleetload_types::ConfigurationError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// A unit of work handed to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Endpoints per worker thread when sizing a pool for a fleet.
pub const ENDPOINTS_PER_WORKER: usize = 8;

/// Smallest pool created by [`WorkerPoolConfig::for_fleet`].
pub const MIN_WORKERS: usize = 4;

/// Largest pool created by [`WorkerPoolConfig::for_fleet`].
pub const MAX_WORKERS: usize = 512;

/// Trait for dispatching potentially blocking work off the scheduler timeline.
///
/// Implementations are fire-and-forget: results travel back through channels
/// captured by the job.
pub trait Dispatch: Send + Sync + 'static {
    /// Run a job on the pool.
    fn spawn(&self, job: Job);

    /// Jobs submitted but not yet finished.
    fn queue_depth(&self) -> usize;

    /// Number of worker threads (1 for inline dispatch).
    fn workers(&self) -> usize;
}

/// Errors from worker pool construction.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Failed to build rayon thread pool: {0}")]
    PoolBuild(String),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

/// Configuration for the endpoint worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker threads.
    pub threads: usize,

    /// Prefix of worker thread names.
    pub thread_name: String,

    /// Stack size per worker thread (bytes).
    pub stack_size: usize,
}

impl WorkerPoolConfig {
    /// Create a configuration with an explicit thread count.
    pub fn new(threads: usize) -> Self {
        Self {
            threads,
            thread_name: "endpoint-worker".to_string(),
            stack_size: 2 * 1024 * 1024,
        }
    }

    /// Size a pool for a fleet: one worker per [`ENDPOINTS_PER_WORKER`]
    /// endpoints, clamped to `[MIN_WORKERS, MAX_WORKERS]`.
    pub fn for_fleet(endpoints: usize) -> Self {
        let threads = endpoints
            .div_ceil(ENDPOINTS_PER_WORKER)
            .clamp(MIN_WORKERS, MAX_WORKERS);
        Self::new(threads)
    }

    /// Set the thread name prefix.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Set the worker stack size.
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.threads == 0 {
            return Err(ConfigurationError::InvalidWorkerCount);
        }
        Ok(())
    }
}

/// Rayon thread pool dispatch.
pub struct PooledDispatch {
    config: WorkerPoolConfig,
    pool: Arc<rayon::ThreadPool>,
    pending: Arc<AtomicUsize>,
}

impl PooledDispatch {
    /// Build the pool.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, DispatchError> {
        config.validate()?;

        let prefix = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .stack_size(config.stack_size)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| DispatchError::PoolBuild(e.to_string()))?;

        tracing::info!(threads = config.threads, "Endpoint worker pool initialized");

        Ok(Self {
            config,
            pool: Arc::new(pool),
            pending: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Dispatch for PooledDispatch {
    fn spawn(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::clone(&self.pending);
        self.pool.spawn(move || {
            job();
            pending.fetch_sub(1, Ordering::Relaxed);
        });
    }

    fn queue_depth(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    fn workers(&self) -> usize {
        self.config.threads
    }
}

/// Dispatch that runs jobs inline on the calling thread.
///
/// All work runs in submission order; queue depth is always 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineDispatch;

impl InlineDispatch {
    pub fn new() -> Self {
        Self
    }
}

impl Dispatch for InlineDispatch {
    fn spawn(&self, job: Job) {
        job();
    }

    fn queue_depth(&self) -> usize {
        0
    }

    fn workers(&self) -> usize {
        1
    }
}
