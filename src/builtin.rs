//! The `builtin` transform: optional resizing, quality and grayscale for the
//! main image, plus an optional blurred placeholder and responsive variants.
//!
//! Operations are applied in a fixed order and each derived image starts from
//! the already-adjusted main image.

use serde::Deserialize;
use serde_json::Value;

use crate::asset::LoadMode;
use crate::error::PipelineError;
use crate::transformable::TransformableImage;
use crate::transforms::{TransformInput, TransformOptions, TransformOutput};

pub const NAME: &str = "builtin";

const PLACEHOLDER_SCALE: f32 = 0.07;
const PLACEHOLDER_BLUR: f32 = 2.0;
const RESPONSIVE_SCALES: [f32; 4] = [0.3, 0.5, 0.7, 1.0];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawOptions {
    #[serde(default)]
    use_placeholder: bool,
    #[serde(default)]
    use_responsive: bool,
    #[serde(default)]
    grayscale: bool,
    load: Option<String>,
    quality: Option<f64>,
    max_dimension: Option<f64>,
    placeholder_quality: Option<f64>,
    placeholder_max_dimension: Option<f64>,
}

/// Options of the built-in transform, validated once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuiltinOptions {
    pub use_placeholder: bool,
    pub use_responsive: bool,
    pub grayscale: bool,
    pub load: Option<LoadMode>,
    pub quality: Option<u8>,
    pub max_dimension: Option<u32>,
    pub placeholder_quality: Option<u8>,
    pub placeholder_max_dimension: Option<u32>,
}

impl BuiltinOptions {
    pub fn from_options(options: &TransformOptions) -> Result<Self, PipelineError> {
        // null means "not provided"
        let provided = options
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let raw: RawOptions = serde_json::from_value(Value::Object(provided))
            .map_err(|e| PipelineError::InvalidOption(e.to_string()))?;

        Ok(Self {
            use_placeholder: raw.use_placeholder,
            use_responsive: raw.use_responsive,
            grayscale: raw.grayscale,
            load: raw.load.as_deref().map(str::parse::<LoadMode>).transpose()?,
            quality: raw.quality.map(|q| quality("quality", q)).transpose()?,
            max_dimension: raw
                .max_dimension
                .map(|d| dimension("maxDimension", d))
                .transpose()?,
            placeholder_quality: raw
                .placeholder_quality
                .map(|q| quality("placeholderQuality", q))
                .transpose()?,
            placeholder_max_dimension: raw
                .placeholder_max_dimension
                .map(|d| dimension("placeholderMaxDimension", d))
                .transpose()?,
        })
    }
}

fn quality(name: &str, value: f64) -> Result<u8, PipelineError> {
    if !(value > 0.0 && value <= 100.0) {
        return Err(PipelineError::InvalidOption(format!(
            "'{name}' must be greater than 0 and at most 100"
        )));
    }
    Ok(value.round().max(1.0) as u8)
}

fn dimension(name: &str, value: f64) -> Result<u32, PipelineError> {
    if !(value >= 1.0 && value <= f64::from(u32::MAX)) {
        return Err(PipelineError::InvalidOption(format!(
            "'{name}' must be a whole number greater than 0"
        )));
    }
    Ok(value.floor() as u32)
}

fn adjust(
    image: TransformableImage,
    max_dimension: Option<u32>,
    quality: Option<u8>,
) -> Result<TransformableImage, PipelineError> {
    let image = match max_dimension {
        Some(d) => image.with_max_dimension(d)?,
        None => image,
    };
    match quality {
        Some(q) => image.with_quality(q),
        None => Ok(image),
    }
}

pub fn transform(input: TransformInput<'_>) -> Result<TransformOutput, PipelineError> {
    let opts = BuiltinOptions::from_options(input.options)?;

    let mut image = adjust(input.image, opts.max_dimension, opts.quality)?;
    if opts.grayscale {
        image = image.grayscale();
    }

    let placeholder = if opts.use_placeholder {
        let p = image.scale(PLACEHOLDER_SCALE)?;
        let p = adjust(p, opts.placeholder_max_dimension, opts.placeholder_quality)?;
        Some(p.blur(PLACEHOLDER_BLUR)?)
    } else {
        None
    };

    let responsive = if opts.use_responsive {
        Some(
            RESPONSIVE_SCALES
                .iter()
                .map(|&s| image.scale(s))
                .collect::<Result<Vec<_>, _>>()?,
        )
    } else {
        None
    };

    Ok(TransformOutput {
        image: Some(image),
        placeholder,
        responsive,
        load: opts.load,
    })
}
