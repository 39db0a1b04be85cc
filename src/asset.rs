//! Output contract consumed by page rendering components.
//!
//! Field names and shapes here are stable: `{ image: {data, width, height},
//! placeholder?, responsive?: [...], load? }`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    /// A `data:` URI or a `static/...` URL.
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

impl Asset {
    pub fn new(data: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            data: data.into(),
            width: Some(width),
            height: Some(height),
        }
    }

    /// Asset without known dimensions (pass-through copies).
    pub fn without_size(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            width: None,
            height: None,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.data.starts_with("data:")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    Immediate,
    Lazy,
}

impl FromStr for LoadMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "lazy" => Ok(Self::Lazy),
            _ => Err(PipelineError::InvalidOption(
                "'load' must be 'immediate' or 'lazy'".to_string(),
            )),
        }
    }
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => f.write_str("immediate"),
            Self::Lazy => f.write_str("lazy"),
        }
    }
}

/// Everything produced for one source image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<Asset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responsive: Option<Vec<Asset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadMode>,
}

/// Result of one `get` call: a bare set for a single job, a list otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Images {
    One(ImageSet),
    Many(Vec<ImageSet>),
}

impl Images {
    pub(crate) fn from_ordered(mut sets: Vec<ImageSet>) -> Self {
        if sets.len() == 1 {
            Self::One(sets.remove(0))
        } else {
            Self::Many(sets)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(sets) => sets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn single(&self) -> Option<&ImageSet> {
        match self {
            Self::One(set) => Some(set),
            Self::Many(_) => None,
        }
    }

    pub fn into_vec(self) -> Vec<ImageSet> {
        match self {
            Self::One(set) => vec![set],
            Self::Many(sets) => sets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_contract_field_names() {
        let set = ImageSet {
            image: Some(Asset::new("static/a.123.jpg", 10, 20)),
            placeholder: None,
            responsive: Some(vec![Asset::new("data:image/jpeg;base64,AA==", 3, 6)]),
            load: Some(LoadMode::Lazy),
        };
        assert_eq!(
            serde_json::to_value(&set).unwrap(),
            json!({
                "image": {"data": "static/a.123.jpg", "width": 10, "height": 20},
                "responsive": [{"data": "data:image/jpeg;base64,AA==", "width": 3, "height": 6}],
                "load": "lazy"
            })
        );
    }

    #[test]
    fn test_copied_asset_omits_dimensions() {
        let asset = Asset::without_size("static/a.jpg");
        assert_eq!((asset.width, asset.height), (None, None));
        assert!(!asset.is_inline());
        assert_eq!(serde_json::to_value(&asset).unwrap(), json!({"data": "static/a.jpg"}));
    }

    #[test]
    fn test_single_result_is_unwrapped() {
        let one = Images::from_ordered(vec![ImageSet::default()]);
        assert!(one.single().is_some());
        assert_eq!(serde_json::to_value(&one).unwrap(), json!({}));

        let none = Images::from_ordered(vec![]);
        assert!(none.is_empty());
        assert_eq!(serde_json::to_value(&none).unwrap(), json!([]));
    }

    #[test]
    fn test_load_mode_parsing() {
        assert_eq!(" LAZY ".parse::<LoadMode>().unwrap(), LoadMode::Lazy);
        assert_eq!("immediate".parse::<LoadMode>().unwrap(), LoadMode::Immediate);
        assert!("eager".parse::<LoadMode>().is_err());
    }
}
