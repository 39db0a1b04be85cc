//! Transform System - Plugin Contract and Registry
//!
//! A transform receives one decoded image plus the caller's options and returns
//! any combination of a main image, a placeholder and responsive variants. It
//! must be a pure function of its inputs. Returning nothing is valid.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::asset::LoadMode;
use crate::builtin;
use crate::error::PipelineError;
use crate::transformable::TransformableImage;

/// Opaque per-call options handed to the transform untouched.
pub type TransformOptions = Map<String, Value>;

pub struct TransformInput<'a> {
    pub image: TransformableImage,
    pub options: &'a TransformOptions,
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub image: Option<TransformableImage>,
    pub placeholder: Option<TransformableImage>,
    pub responsive: Option<Vec<TransformableImage>>,
    pub load: Option<LoadMode>,
}

pub trait Transform: Send + Sync {
    fn apply(&self, input: TransformInput<'_>) -> Result<TransformOutput, PipelineError>;
}

impl<F> Transform for F
where
    F: Fn(TransformInput<'_>) -> Result<TransformOutput, PipelineError> + Send + Sync,
{
    fn apply(&self, input: TransformInput<'_>) -> Result<TransformOutput, PipelineError> {
        self(input)
    }
}

/// A transform looked up by name.
#[derive(Clone)]
pub struct ResolvedTransform {
    pub name: String,
    transform: Arc<dyn Transform>,
}

impl ResolvedTransform {
    pub fn apply(&self, input: TransformInput<'_>) -> Result<TransformOutput, PipelineError> {
        self.transform.apply(input)
    }
}

impl fmt::Debug for ResolvedTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedTransform").field("name", &self.name).finish()
    }
}

fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Transform registry - user transforms shadow built-ins of the same name
pub struct TransformRegistry {
    user: BTreeMap<String, Arc<dyn Transform>>,
    builtins: BTreeMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    /// Registry with no transforms at all.
    pub fn empty() -> Self {
        Self {
            user: BTreeMap::new(),
            builtins: BTreeMap::new(),
        }
    }

    /// Registry holding the built-in transforms.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry
            .builtins
            .insert(builtin::NAME.to_string(), Arc::new(builtin::transform));
        registry
    }

    /// Register a user transform. Names are matched trimmed and case-insensitively.
    pub fn register(
        &mut self,
        name: &str,
        transform: impl Transform + 'static,
    ) -> Result<(), PipelineError> {
        let key = normalize_name(name);
        if key.is_empty() {
            return Err(PipelineError::InvalidTransform(
                "transform name must not be empty".to_string(),
            ));
        }
        if self.user.contains_key(&key) {
            return Err(PipelineError::InvalidTransform(format!(
                "transform '{key}' is already registered"
            )));
        }
        self.user.insert(key, Arc::new(transform));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<ResolvedTransform, PipelineError> {
        let key = normalize_name(name);
        self.user
            .get(&key)
            .or_else(|| self.builtins.get(&key))
            .map(|transform| ResolvedTransform {
                name: key.clone(),
                transform: Arc::clone(transform),
            })
            .ok_or_else(|| PipelineError::TransformNotFound(name.to_string()))
    }

    /// All resolvable names, user transforms first.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.user.keys().map(String::as_str).collect();
        names.extend(
            self.builtins
                .keys()
                .filter(|k| !self.user.contains_key(*k))
                .map(String::as_str),
        );
        names
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        Self::new()
    }
}
