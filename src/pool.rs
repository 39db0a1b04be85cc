//! Fixed-size worker pool.
//!
//! Each worker is a task owning its own job queue and handling one job at a time
//! on the blocking thread pool. Workers share nothing mutable with the
//! dispatcher; jobs go in and [`JobResult`]s come back over channels. A panic
//! inside a job is caught at the task boundary and reported as a fatal result.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PipelineError;
use crate::transforms::TransformRegistry;
use crate::worker::{process_job, Job, JobResult};

/// Default number of workers.
pub const DEFAULT_POOL_SIZE: usize = 4;

#[derive(Debug)]
struct WorkerHandle {
    jobs: mpsc::UnboundedSender<Job>,
    task: JoinHandle<()>,
}

#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<WorkerHandle>,
    results: mpsc::UnboundedReceiver<JobResult>,
}

impl WorkerPool {
    /// Spawn `size` workers. Must be called from within a Tokio runtime.
    pub fn start(size: usize, registry: Arc<TransformRegistry>) -> Result<Self, PipelineError> {
        if size == 0 {
            return Err(PipelineError::InvalidConfig(
                "worker pool size must be at least 1".to_string(),
            ));
        }

        let (results_tx, results) = mpsc::unbounded_channel();
        let workers = (0..size)
            .map(|index| {
                let (jobs, rx) = mpsc::unbounded_channel();
                let task = tokio::spawn(run_worker(
                    index,
                    rx,
                    results_tx.clone(),
                    Arc::clone(&registry),
                ));
                WorkerHandle { jobs, task }
            })
            .collect();

        debug!(size, "worker pool started");
        Ok(Self { workers, results })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job on worker `sequence_id % size` without waiting for it.
    pub fn submit(&self, job: Job) -> Result<(), PipelineError> {
        let index = (job.sequence_id % self.workers.len() as u64) as usize;
        self.workers[index]
            .jobs
            .send(job)
            .map_err(|_| PipelineError::BuildCancelled)
    }

    /// Next result from any worker, in completion order. `None` once every
    /// worker has stopped.
    pub async fn next_result(&mut self) -> Option<JobResult> {
        self.results.recv().await
    }

    /// Stop all workers. Jobs still running finish on their own and their
    /// results are dropped. Dropping the pool does the same.
    pub fn shutdown(self) {
        debug!(size = self.workers.len(), "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.task.abort();
        }
    }
}

async fn run_worker(
    index: usize,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    results: mpsc::UnboundedSender<JobResult>,
    registry: Arc<TransformRegistry>,
) {
    while let Some(job) = jobs.recv().await {
        let sequence_id = job.sequence_id;
        let registry = Arc::clone(&registry);

        let result = match tokio::task::spawn_blocking(move || process_job(&job, &registry)).await {
            Ok(result) => result,
            Err(e) => JobResult::fatal(sequence_id, None, format!("worker {index} failed: {e}")),
        };

        if results.send(result).is_err() {
            break;
        }
    }
}
