//! Bounded worker pool for CPU-bound rendering.
//!
//! Motion rendering shells out to an encoder and blocks for seconds per clip.
//! Jobs run on tokio's blocking threads, at most `workers` at a time.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::PipelineError;

pub struct RenderPool {
    workers: usize,
    slots: Arc<Semaphore>,
}

impl RenderPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            workers,
            slots: Arc::new(Semaphore::new(workers)),
        }
    }

    /// One worker per logical CPU
    pub fn sized_to_host() -> Self {
        Self::new(num_cpus::get())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run a blocking job once a worker is free.
    pub async fn submit<T, F>(&self, job: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::ShutDown)?;

        debug!(available = self.slots.available_permits(), "Render job admitted");

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| PipelineError::TaskPanicked(format!("render job: {}", e)))?
    }

    /// Refuse further jobs; running jobs finish
    pub fn shutdown(&self) {
        self.slots.close();
    }
}
