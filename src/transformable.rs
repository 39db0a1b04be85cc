//! Transformable images - the value handed to transforms.
//!
//! A [`TransformableImage`] never changes after construction. Each operation
//! returns a new image whose history is the receiver's history plus one entry, so
//! operations compose left to right: an image turned grayscale before a
//! placeholder is derived from it yields a grayscale placeholder.
//!
//! The decoded pixel buffer is private. Transforms only see the accessors and the
//! operations below.

use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, DynamicImage, ImageFormat};
use serde::Serialize;

use crate::addressing::mime_for_extension;
use crate::error::PipelineError;

const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// Largest width or height a resize may produce.
pub const MAX_OUTPUT_DIMENSION: u32 = 16_384;

/// One entry of an image's operation history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", content = "value", rename_all = "camelCase")]
pub enum Operation {
    SetFileName(String),
    SetQuality(u8),
    MaxDimension(u32),
    Grayscale,
    Blur(f32),
    ResizeWidth(u32),
    ResizeHeight(u32),
    Resize([u32; 2]),
    Scale(f32),
}

#[derive(Clone)]
pub struct TransformableImage {
    pixels: Arc<DynamicImage>,
    file_name: String,
    quality: Option<u8>,
    history: Vec<Operation>,
}

impl fmt::Debug for TransformableImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformableImage")
            .field("file_name", &self.file_name)
            .field("width", &self.width())
            .field("height", &self.height())
            .field("quality", &self.quality)
            .field("history", &self.history)
            .finish()
    }
}

impl TransformableImage {
    pub fn new(pixels: DynamicImage, file_name: impl Into<String>) -> Result<Self, PipelineError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(PipelineError::invalid_option("file name must be provided"));
        }
        Ok(Self {
            pixels: Arc::new(pixels),
            file_name,
            quality: None,
            history: Vec::new(),
        })
    }

    /// Decode raster bytes. Fails if the codec cannot read them.
    pub fn decode(bytes: &[u8], file_name: impl Into<String>) -> Result<Self, PipelineError> {
        let pixels = image::load_from_memory(bytes)?;
        Self::new(pixels, file_name)
    }

    /// Read and decode an image file, naming it after the file.
    pub fn open(path: &Path) -> Result<Self, PipelineError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| PipelineError::InvalidSource(path.display().to_string()))?;
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes, file_name)
    }

    fn derive(&self, pixels: Arc<DynamicImage>, op: Operation) -> Self {
        let mut history = self.history.clone();
        history.push(op);
        Self {
            pixels,
            file_name: self.file_name.clone(),
            quality: self.quality,
            history,
        }
    }

    fn resized(&self, width: u32, height: u32, op: Operation) -> Self {
        let pixels = self.pixels.resize_exact(width, height, RESIZE_FILTER);
        self.derive(Arc::new(pixels), op)
    }

    /// Set the encoding quality (1-100). Only JPEG output honours it.
    pub fn with_quality(&self, quality: u8) -> Result<Self, PipelineError> {
        if quality == 0 || quality > 100 {
            return Err(PipelineError::invalid_option(format!(
                "'quality' must be between 1 and 100, got {quality}"
            )));
        }
        let mut next = self.derive(Arc::clone(&self.pixels), Operation::SetQuality(quality));
        next.quality = Some(quality);
        Ok(next)
    }

    /// Shrink so the longer side is at most `max`, keeping the aspect ratio.
    pub fn with_max_dimension(&self, max: u32) -> Result<Self, PipelineError> {
        require_positive("maxDimension", max)?;
        let (width, height) = (self.width(), self.height());
        let op = Operation::MaxDimension(max);

        if width >= height && width > max {
            let h = proportional(height, max, width);
            Ok(self.resized(max, h, op))
        } else if height > width && height > max {
            let w = proportional(width, max, height);
            Ok(self.resized(w, max, op))
        } else {
            Ok(self.derive(Arc::clone(&self.pixels), op))
        }
    }

    pub fn grayscale(&self) -> Self {
        self.derive(Arc::new(self.pixels.grayscale()), Operation::Grayscale)
    }

    /// Gaussian blur. Expensive; meant for small placeholders.
    pub fn blur(&self, radius: f32) -> Result<Self, PipelineError> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(PipelineError::invalid_option(format!(
                "blur radius must be greater than 0, got {radius}"
            )));
        }
        Ok(self.derive(Arc::new(self.pixels.blur(radius)), Operation::Blur(radius)))
    }

    /// Resize to `width`, deriving the height proportionally.
    pub fn resize_width(&self, width: u32) -> Result<Self, PipelineError> {
        require_positive("width", width)?;
        let height = proportional(self.height(), width, self.width());
        require_within_limit(width, height)?;
        Ok(self.resized(width, height, Operation::ResizeWidth(width)))
    }

    /// Resize to `height`, deriving the width proportionally.
    pub fn resize_height(&self, height: u32) -> Result<Self, PipelineError> {
        require_positive("height", height)?;
        let width = proportional(self.width(), height, self.height());
        require_within_limit(width, height)?;
        Ok(self.resized(width, height, Operation::ResizeHeight(height)))
    }

    /// Resize to exactly `width` x `height`, ignoring the aspect ratio.
    pub fn resize(&self, width: u32, height: u32) -> Result<Self, PipelineError> {
        require_positive("width", width)?;
        require_positive("height", height)?;
        require_within_limit(width, height)?;
        Ok(self.resized(width, height, Operation::Resize([width, height])))
    }

    pub fn scale(&self, factor: f32) -> Result<Self, PipelineError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(PipelineError::invalid_option(format!(
                "scale factor must be greater than 0, got {factor}"
            )));
        }
        let width = scaled(self.width(), factor)?;
        let height = scaled(self.height(), factor)?;
        Ok(self.resized(width, height, Operation::Scale(factor)))
    }

    /// Rename without touching pixels, so derived images don't overwrite the original.
    pub fn with_file_name(&self, file_name: impl Into<String>) -> Result<Self, PipelineError> {
        let file_name = file_name.into();
        if file_name.trim().is_empty() {
            return Err(PipelineError::invalid_option("file name must be provided"));
        }
        let mut next = self.derive(
            Arc::clone(&self.pixels),
            Operation::SetFileName(file_name.clone()),
        );
        next.file_name = file_name;
        Ok(next)
    }

    /// Encode the current pixels in the format named by the extension.
    pub fn encode(&self) -> Result<Vec<u8>, PipelineError> {
        let format = self.format()?;
        let mut buf = Cursor::new(Vec::new());

        match format {
            ImageFormat::Jpeg => {
                let pixels = encodable_jpeg(&self.pixels);
                match self.quality {
                    Some(q) => pixels.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, q))?,
                    None => pixels.write_with_encoder(JpegEncoder::new(&mut buf))?,
                }
            }
            ImageFormat::Png => self.pixels.write_to(&mut buf, format)?,
            _ => encodable_8bit(&self.pixels).write_to(&mut buf, format)?,
        }

        Ok(buf.into_inner())
    }

    /// Base64 data URI of the current pixels at the current quality.
    pub fn to_data_uri(&self) -> Result<String, PipelineError> {
        let mime = mime_for_extension(&self.extension())?;
        let bytes = self.encode()?;
        let data = base64::engine::general_purpose::STANDARD.encode(bytes);
        Ok(format!("data:{mime};base64,{data}"))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Length of the decoded pixel buffer in bytes.
    pub fn size_bytes(&self) -> usize {
        self.pixels.as_bytes().len()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File name without its extension.
    pub fn file_name_stem(&self) -> String {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => self.file_name[..idx].to_string(),
            _ => self.file_name.clone(),
        }
    }

    /// Extension including the leading dot, or an empty string.
    pub fn extension(&self) -> String {
        match self.file_name.rfind('.') {
            Some(idx) if idx > 0 => self.file_name[idx..].to_string(),
            _ => String::new(),
        }
    }

    pub fn quality(&self) -> Option<u8> {
        self.quality
    }

    pub fn operation_history(&self) -> &[Operation] {
        &self.history
    }

    pub fn color_type(&self) -> ColorType {
        self.pixels.color()
    }

    fn format(&self) -> Result<ImageFormat, PipelineError> {
        let ext = self.extension();
        ImageFormat::from_extension(ext.trim_start_matches('.'))
            .ok_or(PipelineError::UnsupportedExtension(ext))
    }
}

fn require_positive(name: &str, value: u32) -> Result<(), PipelineError> {
    if value == 0 {
        return Err(PipelineError::invalid_option(format!(
            "'{name}' must be greater than 0"
        )));
    }
    Ok(())
}

fn require_within_limit(width: u32, height: u32) -> Result<(), PipelineError> {
    if width > MAX_OUTPUT_DIMENSION || height > MAX_OUTPUT_DIMENSION {
        return Err(PipelineError::invalid_option(format!(
            "{width}x{height} exceeds the {MAX_OUTPUT_DIMENSION}px output limit"
        )));
    }
    Ok(())
}

/// `other * target / reference`, rounded, never below 1. Saturates at `u32::MAX`.
fn proportional(other: u32, target: u32, reference: u32) -> u32 {
    let value = f64::from(other) * f64::from(target) / f64::from(reference.max(1));
    (value.round() as u32).max(1)
}

fn scaled(dimension: u32, factor: f32) -> Result<u32, PipelineError> {
    let value = (f64::from(dimension) * f64::from(factor)).round();
    if value > f64::from(MAX_OUTPUT_DIMENSION) {
        return Err(PipelineError::invalid_option(format!(
            "scaling {dimension}px by {factor} exceeds the {MAX_OUTPUT_DIMENSION}px output limit"
        )));
    }
    Ok((value as u32).max(1))
}

// JPEG has no alpha channel and no 16-bit mode.
fn encodable_jpeg(pixels: &DynamicImage) -> DynamicImage {
    match pixels {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => pixels.clone(),
        p if p.color().has_color() => DynamicImage::ImageRgb8(p.to_rgb8()),
        p => DynamicImage::ImageLuma8(p.to_luma8()),
    }
}

fn encodable_8bit(pixels: &DynamicImage) -> DynamicImage {
    match pixels {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => {
            pixels.clone()
        }
        p if p.color().has_alpha() => DynamicImage::ImageRgba8(p.to_rgba8()),
        p if p.color().has_color() => DynamicImage::ImageRgb8(p.to_rgb8()),
        p => DynamicImage::ImageLuma8(p.to_luma8()),
    }
}
