//! ImageBuild Core - Build-time Image Pipeline
//!
//! # Guarantees
//! 1. Sources Are Validated Before Any Work Starts
//! 2. Transform Values Are Immutable
//! 3. Output Names Are Content-Addressed
//! 4. Results Come Back In Caller Order
//! 5. One Failed Job Cancels The Batch

pub mod addressing;
pub mod asset;
pub mod builtin;
pub mod config;
pub mod error;
pub mod hashing;
pub mod logging;
pub mod pipeline;
pub mod pool;
pub mod transformable;
pub mod transforms;
pub mod validation;
pub mod worker;

pub use addressing::{OutputAddresser, STATIC_PREFIX};
pub use asset::{Asset, ImageSet, Images, LoadMode};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use hashing::{canonical_json, compute_content_key};
pub use pipeline::ImagePipeline;
pub use pool::WorkerPool;
pub use transformable::{Operation, TransformableImage};
pub use transforms::{Transform, TransformInput, TransformOptions, TransformOutput, TransformRegistry};
pub use validation::{SourceDescriptor, SourceKind, Sources};
pub use worker::{Job, JobOutcome, JobResult};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
