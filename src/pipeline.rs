//! Image Pipeline - Single Entry Point
//!
//! `get` validates sources, resolves the transform, fans one job per file out to
//! the worker pool and reassembles the results in caller order. One fatal job
//! result cancels the whole batch.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::asset::{ImageSet, Images};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pool::WorkerPool;
use crate::transforms::{TransformOptions, TransformRegistry};
use crate::validation::{enumerate_files, validate_sources, Sources};
use crate::worker::{Job, JobOutcome, JobResult};

pub struct ImagePipeline {
    config: PipelineConfig,
    registry: Arc<TransformRegistry>,
    pool: Option<WorkerPool>,
}

impl ImagePipeline {
    pub fn new(config: PipelineConfig, registry: TransformRegistry) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            registry: Arc::new(registry),
            pool: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Names of all transforms `get` can resolve.
    pub fn list_transforms(&self) -> Vec<&str> {
        self.registry.list()
    }

    /// Whether an idle worker pool is kept for the next batch.
    pub fn is_running(&self) -> bool {
        self.pool.is_some()
    }

    /// Process `sources` with the named transform, or copy them through when
    /// `transform` is `None`.
    ///
    /// Returns one [`ImageSet`] for a single file and an ordered list otherwise.
    /// Folders expand to their supported files sorted by name.
    ///
    /// # Errors
    /// - `InvalidSource` / `TransformNotFound` before any job is issued
    /// - `BuildCancelled` if any job fails
    #[tracing::instrument(skip_all, fields(batch = %Uuid::new_v4()))]
    pub async fn get(
        &mut self,
        sources: impl Into<Sources>,
        transform: Option<&str>,
        options: TransformOptions,
    ) -> Result<Images, PipelineError> {
        let sources = sources.into().into_vec();
        validate_sources(&sources)?;

        let transform = transform
            .map(|name| self.registry.resolve(name).map(|t| t.name))
            .transpose()?;

        let files = enumerate_files(&sources)?;
        if files.is_empty() {
            return Ok(Images::Many(Vec::new()));
        }

        let options = Arc::new(options);
        let jobs: Vec<Job> = files
            .into_iter()
            .zip(0u64..)
            .map(|(source_path, sequence_id)| Job {
                sequence_id,
                source_path,
                transform: transform.clone(),
                transform_options: Arc::clone(&options),
                output_root: self.config.output_root.clone(),
                max_inline_size: self.config.max_inline_size,
            })
            .collect();

        let expected = jobs.len();
        info!(expected, transform = transform.as_deref().unwrap_or("none"), "processing images");

        let mut results = self.run_batch(jobs).await?;
        results.sort_by_key(|r| r.sequence_id);
        let sets: Vec<ImageSet> = results
            .into_iter()
            .filter_map(JobResult::into_image_set)
            .collect();
        Ok(Images::from_ordered(sets))
    }

    /// Run one batch on the pool, which is taken out of `self` for the duration.
    /// It only goes back once every result has arrived. A batch that ends any
    /// other way, including its future being dropped, drops the pool with it.
    async fn run_batch(&mut self, jobs: Vec<Job>) -> Result<Vec<JobResult>, PipelineError> {
        let mut pool = match self.pool.take() {
            Some(pool) => pool,
            None => WorkerPool::start(self.config.pool_size, Arc::clone(&self.registry))?,
        };

        let results = collect_results(&mut pool, jobs, self.config.job_timeout()).await?;
        self.pool = Some(pool);
        Ok(results)
    }

    /// Stop the worker pool. The next `get` starts a fresh one.
    pub fn shutdown(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.shutdown();
        }
    }
}

async fn collect_results(
    pool: &mut WorkerPool,
    jobs: Vec<Job>,
    timeout: Option<Duration>,
) -> Result<Vec<JobResult>, PipelineError> {
    let expected = jobs.len();
    for job in jobs {
        pool.submit(job)?;
    }

    let mut results = Vec::with_capacity(expected);
    while results.len() < expected {
        let next = match timeout {
            Some(limit) => tokio::time::timeout(limit, pool.next_result())
                .await
                .map_err(|_| {
                    warn!(?limit, "timed out waiting for an image job");
                    PipelineError::BuildCancelled
                })?,
            None => pool.next_result().await,
        };

        let result = next.ok_or_else(|| {
            warn!("worker pool stopped before the batch completed");
            PipelineError::BuildCancelled
        })?;

        if let JobOutcome::Fatal { stage, reason } = &result.outcome {
            warn!(
                sequence_id = result.sequence_id,
                stage = stage.map(|s| s.to_string()).unwrap_or_else(|| "worker".into()),
                %reason,
                "image job failed, cancelling build"
            );
            return Err(PipelineError::BuildCancelled);
        }

        results.push(result);
        info!("Processed image {} of {}", results.len(), expected);
    }

    Ok(results)
}

impl Drop for ImagePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
