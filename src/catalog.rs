//! Model catalog: static mapping from model identifier to target.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::LlmError;
use crate::types::{ModelTarget, ProviderProfile};

#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    targets: HashMap<String, ModelTarget>,
    order: Vec<String>,
}

impl ModelCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configuration. Fails if a referenced profile cannot be resolved.
    pub fn from_config(config: &AppConfig) -> Result<Self, LlmError> {
        config.validate()?;
        let profiles = config.build_profiles()?;
        let mut catalog = Self::new();
        for model in &config.models {
            let profile = profiles.get(&model.profile).ok_or_else(|| {
                LlmError::ConfigurationError(format!(
                    "model '{}' refers to unknown profile '{}'",
                    model.id, model.profile
                ))
            })?;
            catalog.insert(
                ModelTarget::new(&model.id, Arc::clone(profile))
                    .with_thinking(model.thinking)
                    .with_wire_style(model.wire),
            );
        }
        Ok(catalog)
    }

    /// Add a target. A later entry with the same id replaces the earlier one.
    pub fn insert(&mut self, target: ModelTarget) {
        let id = target.id().to_string();
        if self.targets.insert(id.clone(), target).is_none() {
            self.order.push(id);
        }
    }

    /// Add a non-thinking model on `profile`.
    pub fn with_model(mut self, id: impl Into<String>, profile: Arc<ProviderProfile>) -> Self {
        self.insert(ModelTarget::new(id, profile));
        self
    }

    pub fn with_target(mut self, target: ModelTarget) -> Self {
        self.insert(target);
        self
    }

    pub fn lookup(&self, id: &str) -> Result<&ModelTarget, LlmError> {
        self.targets
            .get(id)
            .ok_or_else(|| LlmError::UnknownModel(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.targets.contains_key(id)
    }

    /// Model ids in insertion order.
    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}
