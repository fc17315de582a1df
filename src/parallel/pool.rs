//! Fixed-size worker pool that runs CPU-bound units in waves

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::{debug, error, info};

use crate::error::{Result, ResizeError};

/// A rayon thread pool sized to the wave width.
///
/// Work is handed over with [`WorkerPool::run_wave`]; results come back through
/// oneshot channels so awaiting a wave never blocks the async runtime.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    capacity: usize,
}

impl WorkerPool {
    /// Build a pool of `workers` threads, or one per available CPU when `None`
    pub fn new(workers: Option<usize>) -> Result<Self> {
        let capacity = match workers {
            Some(0) => return Err(ResizeError::pool("Worker count must be greater than 0")),
            Some(count) => count,
            None => default_capacity(),
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(capacity)
            .thread_name(|index| format!("resize-worker-{}", index))
            .build()
            .map_err(|e| ResizeError::pool(format!("Failed to build worker pool: {}", e)))?;

        info!("Initialized worker pool with {} workers", capacity);

        Ok(Self { pool, capacity })
    }

    /// Number of units that run at once, which is also the wave size
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run `f` on every item and wait until all of them settled.
    ///
    /// Results are returned in submission order. A panicking item does not
    /// cut the wave short: its siblings still run to completion and the panic
    /// is reported afterwards as [`ResizeError::WorkerPanicked`].
    pub async fn run_wave<T, R, F>(&self, items: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let wave_size = items.len();
        debug!("Submitting wave of {} units", wave_size);

        let f = Arc::new(f);
        let receivers: Vec<_> = items
            .into_iter()
            .map(|item| {
                let (tx, rx) = oneshot::channel();
                let f = Arc::clone(&f);
                self.pool.spawn(move || {
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(item)));
                    // Receiver only disappears if the awaiting future was dropped
                    let _ = tx.send(outcome);
                });
                rx
            })
            .collect();

        let settled = join_all(receivers).await;

        let mut results = Vec::with_capacity(wave_size);
        let mut failure = None;
        for outcome in settled {
            match outcome {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(payload)) => {
                    let message = panic_message(payload.as_ref());
                    error!("Worker panicked: {}", message);
                    failure.get_or_insert(ResizeError::WorkerPanicked { message });
                }
                Err(_) => {
                    failure.get_or_insert_with(|| {
                        ResizeError::pool("Worker exited without reporting a result")
                    });
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => {
                debug!("Wave of {} units settled", wave_size);
                Ok(results)
            }
        }
    }
}

/// Available parallelism, falling back to the logical CPU count
pub fn default_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or_else(|_| num_cpus::get())
        .max(1)
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
