//! Provider registry: default-provider resolution and exclusive activation.

use super::base::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SwitchResult {
    pub switched: bool,
    pub from: String,
    pub to: String,
}

#[derive(Clone)]
pub struct ResolvedModel {
    pub provider_name: String,
    pub model: String,
    pub provider: Arc<dyn Provider>,
}

/// Owns every registered backend and the single `active_provider` slot.
///
/// Activation serializes backend resource ownership: switching away from
/// a provider invokes its `stop()` hook (e.g. evicting an Ollama model)
/// before the incoming provider's `start()`, all under one lock so no
/// third provider can start in between.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
    active: Mutex<String>,
}

impl ProviderRegistry {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
            active: Mutex::new(String::new()),
        }
    }

    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    pub fn default_provider_name(&self) -> &str {
        &self.default_provider
    }

    pub fn set_default(&mut self, name: impl Into<String>) {
        self.default_provider = name.into();
    }

    pub fn list(&self) -> Vec<Arc<dyn Provider>> {
        self.providers.values().cloned().collect()
    }

    /// Split `"provider:model"`, or treat a bare name as a model of the
    /// default provider. Unknown provider names resolve to `None`.
    pub fn resolve(&self, model_string: &str) -> Option<ResolvedModel> {
        let (provider_name, model) = match model_string.split_once(':') {
            Some((p, m)) => (p.to_string(), m.to_string()),
            None => (self.default_provider.clone(), model_string.to_string()),
        };
        let provider = self.get(&provider_name)?;
        Some(ResolvedModel {
            provider_name,
            model,
            provider,
        })
    }

    /// Hand the active slot to `name`. No-op when `name` is already
    /// active or unknown. The previous holder's `stop()` runs before the
    /// new holder's `start()`, both under the slot lock.
    pub async fn activate(&self, name: &str) -> SwitchResult {
        let mut out = SwitchResult::default();
        if name.is_empty() {
            return out;
        }
        let mut active = self.active.lock().await;
        if *active == name {
            return out;
        }
        let Some(next) = self.get(name) else {
            return out;
        };
        if !active.is_empty() {
            if let Some(prev) = self.get(&active) {
                prev.stop().await;
            }
        }
        next.start().await;
        out.switched = true;
        out.from = active.clone();
        out.to = name.to_string();
        *active = name.to_string();
        out
    }

    pub async fn active_provider_name(&self) -> String {
        self.active.lock().await.clone()
    }
}
