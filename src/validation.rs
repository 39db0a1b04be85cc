//! Source validation and enumeration.
//!
//! Every source is checked before any job is issued; a single bad entry fails
//! the whole call.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Raster extensions accepted as input, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Folder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub kind: SourceKind,
    pub path: PathBuf,
}

impl SourceDescriptor {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::File,
            path: path.into(),
        }
    }

    pub fn folder(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: SourceKind::Folder,
            path: path.into(),
        }
    }
}

/// One descriptor or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sources {
    One(SourceDescriptor),
    Many(Vec<SourceDescriptor>),
}

impl Sources {
    pub fn into_vec(self) -> Vec<SourceDescriptor> {
        match self {
            Self::One(source) => vec![source],
            Self::Many(sources) => sources,
        }
    }
}

impl From<SourceDescriptor> for Sources {
    fn from(source: SourceDescriptor) -> Self {
        Self::One(source)
    }
}

impl From<Vec<SourceDescriptor>> for Sources {
    fn from(sources: Vec<SourceDescriptor>) -> Self {
        Self::Many(sources)
    }
}

pub fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

pub fn validate_source(source: &SourceDescriptor) -> Result<(), PipelineError> {
    let display = source.path.display().to_string();
    if display.trim().is_empty() {
        return Err(PipelineError::InvalidSource("path must not be empty".to_string()));
    }

    match source.kind {
        SourceKind::Folder => {
            let is_dir = fs::metadata(&source.path).map(|m| m.is_dir()).unwrap_or(false);
            if !is_dir {
                return Err(PipelineError::InvalidSource(format!(
                    "path '{display}' does not exist or is not a folder"
                )));
            }
        }
        SourceKind::File => {
            if !has_supported_extension(&source.path) {
                return Err(PipelineError::InvalidSource(format!(
                    "'{display}' does not have a supported image extension"
                )));
            }
            let is_file = fs::metadata(&source.path).map(|m| m.is_file()).unwrap_or(false);
            if !is_file {
                return Err(PipelineError::InvalidSource(format!(
                    "path '{display}' does not exist or is not a file"
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_sources(sources: &[SourceDescriptor]) -> Result<(), PipelineError> {
    sources.iter().try_for_each(validate_source)
}

/// Supported image files directly inside `folder`, sorted by file name.
/// Subdirectories are not descended into.
pub fn expand_folder(folder: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(folder)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && has_supported_extension(&path) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Expand sources into the ordered list of files to process.
pub fn enumerate_files(sources: &[SourceDescriptor]) -> Result<Vec<PathBuf>, PipelineError> {
    let mut files = Vec::new();
    for source in sources {
        match source.kind {
            SourceKind::File => files.push(source.path.clone()),
            SourceKind::Folder => files.extend(expand_folder(&source.path)?),
        }
    }
    Ok(files)
}
