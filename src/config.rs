//! Pipeline configuration.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pool::DEFAULT_POOL_SIZE;

/// Assets up to this many bytes are inlined by default.
pub const DEFAULT_MAX_INLINE_SIZE: u64 = 100_000;

/// Directory under the site's dist folder that assets are written to.
pub const STATIC_DIR: &str = "static";

fn default_max_inline_size() -> u64 { DEFAULT_MAX_INLINE_SIZE }
fn default_pool_size() -> usize { DEFAULT_POOL_SIZE }

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub output_root: PathBuf,
    #[serde(default = "default_max_inline_size")]
    pub max_inline_size: u64,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    /// Cancel the batch if no result arrives within this many milliseconds.
    /// Absent means wait forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_timeout_ms: Option<u64>,
}

impl PipelineConfig {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            max_inline_size: DEFAULT_MAX_INLINE_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
            job_timeout_ms: None,
        }
    }

    /// Output root at `<dist>/static`.
    pub fn for_dist_dir(dist: impl AsRef<Path>) -> Self {
        Self::new(dist.as_ref().join(STATIC_DIR))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, PipelineError> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_inline_size(mut self, max_inline_size: u64) -> Self {
        self.max_inline_size = max_inline_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.output_root.as_os_str().is_empty() {
            return Err(PipelineError::InvalidConfig("outputRoot must not be empty".into()));
        }
        if self.pool_size == 0 {
            return Err(PipelineError::InvalidConfig("poolSize must be at least 1".into()));
        }
        if self.job_timeout_ms == Some(0) {
            return Err(PipelineError::InvalidConfig("jobTimeoutMs must be greater than 0".into()));
        }
        Ok(())
    }

    /// Create the output root if it does not exist yet.
    pub fn ensure_output_root(&self) -> Result<(), PipelineError> {
        fs::create_dir_all(&self.output_root)?;
        Ok(())
    }
}
