//! Provider registry: id-keyed directory of configured adapters.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::traits::LlmProvider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn LlmProvider>>>,
    default_id: RwLock<Option<String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. The first registration becomes the default.
    pub fn register(&self, provider: Arc<dyn LlmProvider>) {
        let id = provider.provider_id().to_string();
        let mut providers = self.providers.write();
        providers.insert(id.clone(), provider);
        let mut default_id = self.default_id.write();
        if default_id.is_none() {
            *default_id = Some(id);
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.read().get(id).cloned()
    }

    /// Resolve a provider: explicit id first, then the default slot.
    pub fn resolve(&self, id: Option<&str>) -> Option<Arc<dyn LlmProvider>> {
        if let Some(id) = id {
            if let Some(p) = self.get(id) {
                return Some(p);
            }
        }
        let default_id = self.default_id.read().clone()?;
        self.get(&default_id)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[test]
    fn first_registration_is_default() {
        let registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MockProvider::always_text("hi")));
        assert!(!registry.is_empty());
        assert!(registry.resolve(None).is_some());
        assert!(registry.resolve(Some("mock")).is_some());
        assert!(registry.resolve(Some("missing")).is_some()); // falls back to default
    }

    #[test]
    fn get_unknown_returns_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.get("nope").is_none());
        assert!(registry.resolve(Some("nope")).is_none());
    }
}
