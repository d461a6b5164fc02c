//! Task schedulers that execute load processes

use crate::error::{ResourceError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

/// Unit of work handed to a scheduler
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool collaborator
///
/// Tasks are atomic from the scheduler's view: they never yield, and each
/// one catches its own panics.
pub trait TaskScheduler: Send + Sync {
    fn submit(&self, task: Task);
}

/// Runs every task immediately on the submitting thread
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineScheduler;

impl TaskScheduler for InlineScheduler {
    fn submit(&self, task: Task) {
        task();
    }
}

/// Holds tasks until [`DeferredScheduler::run_pending`] is called
#[derive(Default)]
pub struct DeferredScheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl DeferredScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued tasks, including any they submit, on the calling thread
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl TaskScheduler for DeferredScheduler {
    fn submit(&self, task: Task) {
        self.queue.lock().push_back(task);
    }
}

/// Rayon-backed worker pool
#[cfg(feature = "parallel")]
pub struct RayonScheduler {
    pool: rayon::ThreadPool,
}

#[cfg(feature = "parallel")]
impl RayonScheduler {
    /// `threads == 0` uses rayon's default thread count
    pub fn new(threads: usize, thread_name: &str) -> Result<Self> {
        let prefix = thread_name.to_string();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{prefix}-{i}"))
            .build()
            .map_err(|e| ResourceError::Configuration(format!("thread pool: {e}")))?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

#[cfg(feature = "parallel")]
impl TaskScheduler for RayonScheduler {
    fn submit(&self, task: Task) {
        self.pool.spawn(task);
    }
}

/// Run `func`, turning a panic into a backend error
pub(crate) fn halt_unwinding<R>(func: impl FnOnce() -> Result<R>) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(func)).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(ResourceError::Backend(format!("load process panicked: {msg}")))
    })
}
