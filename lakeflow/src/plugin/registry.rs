//! Process-scoped plugin registry.

use std::collections::HashMap;

use parking_lot::Mutex;

use lakeflow_shared::errors::{LakeflowError, LakeflowResult};

use super::PluginHandle;

#[derive(Default)]
struct RegistryState {
    plugins: HashMap<String, PluginHandle>,
    /// Registration order, used to order plugin migrations.
    order: Vec<String>,
}

/// Write-once-per-name map from plugin name to handle.
///
/// Entries are never replaced or removed.
#[derive(Default)]
pub struct PluginRegistry {
    state: Mutex<RegistryState>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: &str, plugin: PluginHandle) -> LakeflowResult<()> {
        let mut state = self.state.lock();
        if state.plugins.contains_key(name) {
            return Err(LakeflowError::DuplicatePlugin(name.to_string()));
        }
        state.plugins.insert(name.to_string(), plugin);
        state.order.push(name.to_string());
        tracing::debug!(plugin = %name, "Registered plugin");
        Ok(())
    }

    pub fn get(&self, name: &str) -> LakeflowResult<PluginHandle> {
        self.state
            .lock()
            .plugins
            .get(name)
            .cloned()
            .ok_or_else(|| LakeflowError::PluginNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().plugins.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().order.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::Plugin;
    use std::sync::Arc;

    struct Named(&'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = PluginRegistry::new();
        registry.register("jira", Arc::new(Named("jira"))).unwrap();
        registry.register("github", Arc::new(Named("github"))).unwrap();

        assert_eq!(registry.get("jira").unwrap().name(), "jira");
        assert!(registry.contains("github"));
        assert_eq!(registry.names(), vec!["jira", "github"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_is_rejected_and_first_wins() {
        let registry = PluginRegistry::new();
        registry.register("jira", Arc::new(Named("first"))).unwrap();

        let err = registry.register("jira", Arc::new(Named("second"))).unwrap_err();
        assert!(matches!(err, LakeflowError::DuplicatePlugin(ref n) if n == "jira"));
        assert_eq!(registry.get("jira").unwrap().name(), "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_plugin() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("gitlab"),
            Err(LakeflowError::PluginNotFound(ref n)) if n == "gitlab"
        ));
    }
}
