use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::{error::PluginError, plugin::JobPlugin};

/// Constructor for a plugin, invoked on every resolution.
pub type PluginFactory = Box<dyn Fn() -> Result<Arc<dyn JobPlugin>, PluginError> + Send + Sync>;

/// Maps configured plugin type strings to constructors.
///
/// Resolution of an unregistered key is a typed [`PluginError::UnknownType`],
/// never a runtime load failure.
pub struct PluginRegistry {
    factories: HashMap<String, PluginFactory>,
}

impl PluginRegistry {
    /// Create an empty registry with no plugin types.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a constructor under `plugin_type`, replacing any previous one.
    pub fn register<F>(&mut self, plugin_type: &str, factory: F)
    where
        F: Fn() -> Result<Arc<dyn JobPlugin>, PluginError> + Send + Sync + 'static,
    {
        info!(plugin_type, "registering plugin type");
        self.factories
            .insert(plugin_type.to_string(), Box::new(factory));
    }

    /// Register a shared instance under its own [`JobPlugin::name`].
    pub fn register_instance(&mut self, plugin: Arc<dyn JobPlugin>) {
        let name = plugin.name().to_string();
        self.register(&name, move || Ok(Arc::clone(&plugin)));
    }

    pub fn contains(&self, plugin_type: &str) -> bool {
        self.factories.contains_key(plugin_type)
    }

    /// Build the plugin registered under `plugin_type`.
    pub fn resolve(&self, plugin_type: &str) -> Result<Arc<dyn JobPlugin>, PluginError> {
        let factory = self
            .factories
            .get(plugin_type)
            .ok_or_else(|| PluginError::UnknownType {
                plugin_type: plugin_type.to_string(),
            })?;
        factory()
    }

    /// Registered keys, sorted for deterministic output.
    pub fn plugin_types(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ExecutionError, plugin::ExecutionRequest};
    use async_trait::async_trait;
    use conduit_core::types::EventResult;

    struct Echo;

    #[async_trait]
    impl JobPlugin for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn execute(&self, req: &ExecutionRequest) -> Result<EventResult, ExecutionError> {
            Ok(EventResult::success(&req.job_name, &req.target_id))
        }
    }

    #[test]
    fn unknown_type_is_typed_error() {
        let registry = PluginRegistry::new();
        assert!(matches!(
            registry.resolve("missing"),
            Err(PluginError::UnknownType { plugin_type }) if plugin_type == "missing"
        ));
    }

    #[test]
    fn instance_registers_under_its_name() {
        let mut registry = PluginRegistry::new();
        registry.register_instance(Arc::new(Echo));
        assert!(registry.contains("echo"));
        assert_eq!(registry.resolve("echo").unwrap().name(), "echo");
    }

    #[test]
    fn failing_factory_surfaces_instantiation_error() {
        let mut registry = PluginRegistry::new();
        registry.register("broken", || {
            Err(PluginError::Instantiation {
                plugin_type: "broken".into(),
                reason: "missing credentials".into(),
            })
        });
        assert!(matches!(
            registry.resolve("broken"),
            Err(PluginError::Instantiation { .. })
        ));
        assert_eq!(registry.plugin_types(), vec!["broken".to_string()]);
    }
}
