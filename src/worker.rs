//! Per-job processing.
//!
//! A job moves through `Received -> (Copying | Loading -> Transforming) ->
//! Addressing`. Any error along the way becomes a [`JobOutcome::Fatal`]; the
//! worker reports failures as data and never propagates them.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::addressing::{Addressed, OutputAddresser, WriteQueue};
use crate::asset::{Asset, ImageSet};
use crate::error::PipelineError;
use crate::transformable::TransformableImage;
use crate::transforms::{TransformInput, TransformOptions, TransformRegistry};

/// Unit of work sent to a worker. Immutable once sent.
#[derive(Debug, Clone)]
pub struct Job {
    /// Position in the batch; only used to restore order.
    pub sequence_id: u64,
    pub source_path: PathBuf,
    /// Name of a registered transform, `None` for a pass-through copy.
    pub transform: Option<String>,
    pub transform_options: Arc<TransformOptions>,
    pub output_root: PathBuf,
    pub max_inline_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Loading,
    Transforming,
    Copying,
    Addressing,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Loading => "loading",
            Self::Transforming => "transforming",
            Self::Copying => "copying",
            Self::Addressing => "addressing",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Copied(ImageSet),
    Transformed(ImageSet),
    /// Aborts the batch. `stage` is `None` when the worker itself died.
    Fatal {
        stage: Option<JobStage>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub sequence_id: u64,
    pub outcome: JobOutcome,
}

impl JobResult {
    pub fn fatal(sequence_id: u64, stage: Option<JobStage>, reason: impl Into<String>) -> Self {
        Self {
            sequence_id,
            outcome: JobOutcome::Fatal {
                stage,
                reason: reason.into(),
            },
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.outcome, JobOutcome::Fatal { .. })
    }

    /// Asset payload of a successful job.
    pub fn into_image_set(self) -> Option<ImageSet> {
        match self.outcome {
            JobOutcome::Copied(set) | JobOutcome::Transformed(set) => Some(set),
            JobOutcome::Fatal { .. } => None,
        }
    }
}

/// Run one job to completion. Always yields exactly one result.
pub fn process_job(job: &Job, registry: &TransformRegistry) -> JobResult {
    let mut stage = JobStage::Received;
    match run(job, registry, &mut stage) {
        Ok(outcome) => {
            debug!(source = %job.source_path.display(), sequence_id = job.sequence_id, "job complete");
            JobResult {
                sequence_id: job.sequence_id,
                outcome,
            }
        }
        Err(e) => {
            warn!(
                source = %job.source_path.display(),
                %stage,
                error = %e,
                "processing image produced an error"
            );
            JobResult::fatal(job.sequence_id, Some(stage), e.to_string())
        }
    }
}

fn run(
    job: &Job,
    registry: &TransformRegistry,
    stage: &mut JobStage,
) -> Result<JobOutcome, PipelineError> {
    let transform = job
        .transform
        .as_deref()
        .map(|name| registry.resolve(name))
        .transpose()?;

    let addresser = OutputAddresser::new(&job.output_root, job.max_inline_size);
    let mut writes = WriteQueue::new();

    let Some(transform) = transform else {
        *stage = JobStage::Copying;
        let addressed = addresser.address_copy(&job.source_path)?;
        let image = Asset::without_size(take_locator(addressed, &mut writes));
        writes.flush()?;
        return Ok(JobOutcome::Copied(ImageSet {
            image: Some(image),
            ..Default::default()
        }));
    };

    *stage = JobStage::Loading;
    let source = TransformableImage::open(&job.source_path)?;

    *stage = JobStage::Transforming;
    let output = transform.apply(TransformInput {
        image: source,
        options: &job.transform_options,
    })?;

    *stage = JobStage::Addressing;
    let image = output
        .image
        .map(|img| address(&addresser, &img, &mut writes))
        .transpose()?;

    let placeholder = output
        .placeholder
        .map(|p| {
            let renamed = p.with_file_name(format!("{}_placeholder{}", p.file_name_stem(), p.extension()))?;
            address(&addresser, &renamed, &mut writes)
        })
        .transpose()?;

    let responsive = output
        .responsive
        .map(|variants| {
            variants
                .iter()
                .enumerate()
                .map(|(i, r)| {
                    let renamed = r.with_file_name(format!("{}_{i}{}", r.file_name_stem(), r.extension()))?;
                    address(&addresser, &renamed, &mut writes)
                })
                .collect::<Result<Vec<_>, PipelineError>>()
        })
        .transpose()?;

    writes.flush()?;

    Ok(JobOutcome::Transformed(ImageSet {
        image,
        placeholder,
        responsive,
        load: output.load,
    }))
}

fn address(
    addresser: &OutputAddresser<'_>,
    image: &TransformableImage,
    writes: &mut WriteQueue,
) -> Result<Asset, PipelineError> {
    let addressed = addresser.address_image(image)?;
    Ok(Asset::new(
        take_locator(addressed, writes),
        image.width(),
        image.height(),
    ))
}

fn take_locator(addressed: Addressed, writes: &mut WriteQueue) -> String {
    if let Some(write) = addressed.write {
        writes.push(write);
    }
    addressed.locator
}
