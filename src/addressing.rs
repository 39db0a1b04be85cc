//! Output Addresser - inline or content-addressed
//!
//! Small assets become base64 data URIs. Larger ones are written under the output
//! root and referenced by a `static/...` URL. Writes are collected in a
//! [`WriteQueue`] and flushed once the whole job has been addressed.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};

use base64::Engine;
use tracing::debug;

use crate::error::PipelineError;
use crate::hashing::{compute_content_key, HashableAsset};
use crate::transformable::TransformableImage;

/// URL prefix of every non-inlined asset.
pub const STATIC_PREFIX: &str = "static/";

/// MIME type for an extension (with or without the leading dot).
pub fn mime_for_extension(ext: &str) -> Result<&'static str, PipelineError> {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "png" => Ok("image/png"),
        "bmp" => Ok("image/bmp"),
        "tif" | "tiff" => Ok("image/tiff"),
        _ => Err(PipelineError::UnsupportedExtension(format!(
            "cannot convert file with extension '{ext}' to base64"
        ))),
    }
}

/// A filesystem write owed by an addressed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingWrite {
    Encoded { path: PathBuf, bytes: Vec<u8> },
    Copy { from: PathBuf, to: PathBuf },
}

impl PendingWrite {
    pub fn target(&self) -> &Path {
        match self {
            Self::Encoded { path, .. } => path,
            Self::Copy { to, .. } => to,
        }
    }

    fn apply(&self) -> Result<(), PipelineError> {
        match self {
            Self::Encoded { path, bytes } => fs::write(path, bytes)?,
            Self::Copy { from, to } => {
                fs::copy(from, to)?;
            }
        }
        Ok(())
    }
}

/// Writes scheduled by one job, deduplicated by target path.
#[derive(Debug, Default)]
pub struct WriteQueue {
    pending: Vec<PendingWrite>,
    targets: HashSet<PathBuf>,
}

impl WriteQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a write. A second write to the same target is dropped; content
    /// addressing makes it identical.
    pub fn push(&mut self, write: PendingWrite) {
        if self.targets.insert(write.target().to_path_buf()) {
            self.pending.push(write);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn flush(self) -> Result<usize, PipelineError> {
        for write in &self.pending {
            debug!(path = %write.target().display(), "writing asset");
            write.apply()?;
        }
        Ok(self.pending.len())
    }
}

/// Locator for an asset plus the write it needs, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addressed {
    pub locator: String,
    pub write: Option<PendingWrite>,
}

impl Addressed {
    fn inline(locator: String) -> Self {
        Self { locator, write: None }
    }
}

#[derive(Debug, Clone)]
pub struct OutputAddresser<'a> {
    output_root: &'a Path,
    max_inline_size: u64,
}

impl<'a> OutputAddresser<'a> {
    pub fn new(output_root: &'a Path, max_inline_size: u64) -> Self {
        Self {
            output_root,
            max_inline_size,
        }
    }

    /// Address a transformed image. Sizes up to and including the limit are inlined.
    pub fn address_image(&self, image: &TransformableImage) -> Result<Addressed, PipelineError> {
        if (image.size_bytes() as u64) <= self.max_inline_size {
            return Ok(Addressed::inline(image.to_data_uri()?));
        }

        let file_name = content_addressed_name(image)?;
        let path = contained_path(self.output_root, &file_name)?;

        Ok(Addressed {
            locator: format!("{STATIC_PREFIX}{file_name}"),
            write: Some(PendingWrite::Encoded {
                path,
                bytes: image.encode()?,
            }),
        })
    }

    /// Address an untransformed source file by its on-disk size.
    pub fn address_copy(&self, source: &Path) -> Result<Addressed, PipelineError> {
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::InvalidSource(source.display().to_string()))?;

        let size = fs::metadata(source)?.len();

        if size <= self.max_inline_size {
            let ext = source
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mime = mime_for_extension(&ext)?;
            let data = base64::engine::general_purpose::STANDARD.encode(fs::read(source)?);
            return Ok(Addressed::inline(format!("data:{mime};base64,{data}")));
        }

        let to = contained_path(self.output_root, &file_name)?;

        Ok(Addressed {
            locator: format!("{STATIC_PREFIX}{file_name}"),
            write: Some(PendingWrite::Copy {
                from: source.to_path_buf(),
                to,
            }),
        })
    }
}

/// `<stem>.<key><ext>` for an image.
pub fn content_addressed_name(image: &TransformableImage) -> Result<String, PipelineError> {
    let stem = image.file_name_stem();
    let ext = image.extension();
    let key = compute_content_key(&HashableAsset {
        output_file: format!("{stem}{ext}"),
        operations: image.operation_history(),
        width: image.width(),
        height: image.height(),
        size: image.size_bytes(),
    })?;
    Ok(format!("{stem}.{key}{ext}"))
}

/// Join `file_name` onto `root`, rejecting results that leave `root`.
pub fn contained_path(root: &Path, file_name: &str) -> Result<PathBuf, PipelineError> {
    let root = lexical_normalize(root);
    let candidate = lexical_normalize(&root.join(file_name));

    if candidate == root || !candidate.starts_with(&root) {
        return Err(PipelineError::InvalidOutputPath(format!(
            "'{file_name}' resolves outside the output root {}",
            root.display()
        )));
    }
    Ok(candidate)
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
