//! Plugin registry - loading, prefix-scoped registration, quarantine.
//!
//! A plugin contributes tools, hook handlers, and agent types through
//! the `PluginApi` handed to it during registration. Contributions are
//! namespaced by the plugin id (`<id>__` for tools, `<id>:` for agent
//! types) and removed together when the plugin is unregistered. A
//! plugin that fails to load is quarantined: recorded in the load-errors
//! table and never registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::agent::{AgentTypeCatalog, AgentTypeDefinition};
use crate::error::PluginError;
use crate::hooks::{HookBus, HookHandler};
use crate::tools::{Tool, ToolRegistry, ToolSource};

use super::manifest::{load_manifest, PluginManifest, PLUGIN_MANIFEST_FILENAME};

/// Main interface for plugins.
pub trait Plugin: Send + Sync {
    /// The plugin's manifest.
    fn manifest(&self) -> PluginManifest;

    /// Contribute to the runtime through the API.
    fn register(&self, api: &mut PluginApi) -> Result<(), PluginError>;

    /// Cleanup when the plugin is unloaded.
    fn unregister(&self) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Collects a plugin's contributions during registration.
///
/// The registry applies the collected contributions only after
/// `Plugin::register` succeeds, so a failing plugin leaves no trace.
#[derive(Default)]
pub struct PluginApi {
    tools: Vec<Arc<dyn Tool>>,
    hook_handlers: Vec<(String, i32, Arc<dyn HookHandler>)>,
    agent_types: Vec<AgentTypeDefinition>,
}

impl PluginApi {
    /// Register a tool (exposed as `<plugin>__<name>`).
    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Register an in-process hook handler.
    pub fn register_hook_handler(
        &mut self,
        pattern: impl Into<String>,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        self.hook_handlers.push((pattern.into(), priority, handler));
    }

    /// Register an agent type (exposed as `<plugin>:<name>`).
    pub fn register_agent_type(&mut self, definition: AgentTypeDefinition) {
        self.agent_types.push(definition);
    }
}

/// A quarantined plugin load failure.
#[derive(Debug, Clone)]
pub struct PluginLoadError {
    /// Plugin id, or the manifest path when no id could be read
    pub plugin: String,
    /// What went wrong
    pub error: String,
}

/// Result of discovering one plugin directory.
#[derive(Debug)]
pub enum PluginLoadResult {
    /// Manifest read and valid
    Ok(PluginManifest),
    /// Manifest missing or invalid
    Error { path: PathBuf, error: String },
}

/// Registry of loaded plugins.
pub struct PluginRegistry {
    plugins: RwLock<HashMap<String, Arc<dyn Plugin>>>,
    manifests: RwLock<HashMap<String, PluginManifest>>,
    load_errors: RwLock<Vec<PluginLoadError>>,
    tools: Arc<RwLock<ToolRegistry>>,
    hooks: Arc<HookBus>,
    agent_types: Arc<AgentTypeCatalog>,
}

impl PluginRegistry {
    /// Create a registry wired to the given runtime registries.
    pub fn new(
        tools: Arc<RwLock<ToolRegistry>>,
        hooks: Arc<HookBus>,
        agent_types: Arc<AgentTypeCatalog>,
    ) -> Self {
        PluginRegistry {
            plugins: RwLock::new(HashMap::new()),
            manifests: RwLock::new(HashMap::new()),
            load_errors: RwLock::new(Vec::new()),
            tools,
            hooks,
            agent_types,
        }
    }

    /// Register a plugin and apply its contributions.
    pub fn register(&self, plugin: Arc<dyn Plugin>) -> Result<(), PluginError> {
        let manifest = plugin.manifest();
        manifest.validate().map_err(|e| self.quarantine(&manifest.id, e))?;
        let id = manifest.id.clone();

        if self
            .plugins
            .read()
            .expect("plugin registry poisoned")
            .contains_key(&id)
        {
            return Err(PluginError::Load(format!(
                "plugin '{}' is already registered",
                id
            )));
        }

        // Collect contributions without touching the live registries.
        let mut api = PluginApi::default();
        plugin
            .register(&mut api)
            .map_err(|e| self.quarantine(&id, e))?;

        // Contributions must be covered by declared capabilities.
        if !api.tools.is_empty() && !manifest.capabilities.tools {
            return Err(self.quarantine(
                &id,
                PluginError::Lifecycle(format!(
                    "plugin '{}' registered tools without the tools capability",
                    id
                )),
            ));
        }
        if !api.hook_handlers.is_empty() && !manifest.capabilities.hooks {
            return Err(self.quarantine(
                &id,
                PluginError::Lifecycle(format!(
                    "plugin '{}' registered hooks without the hooks capability",
                    id
                )),
            ));
        }
        if !api.agent_types.is_empty() && !manifest.capabilities.subagents {
            return Err(self.quarantine(
                &id,
                PluginError::Lifecycle(format!(
                    "plugin '{}' registered agent types without the subagents capability",
                    id
                )),
            ));
        }

        // Apply tools; roll back on collision.
        let source = ToolSource::Plugin(id.clone());
        {
            let mut tools = self.tools.write().expect("tool registry poisoned");
            for tool in &api.tools {
                if let Err(e) = tools.register(Arc::clone(tool), source.clone()) {
                    tools.unregister_source(&source);
                    return Err(self.quarantine(&id, PluginError::Lifecycle(e.to_string())));
                }
            }
        }

        // Apply agent types under the plugin prefix.
        for mut definition in api.agent_types {
            definition.name = format!("{}:{}", id, definition.name);
            if let Err(e) = self.agent_types.register(definition) {
                self.tools
                    .write()
                    .expect("tool registry poisoned")
                    .unregister_source(&source);
                self.agent_types.unregister_prefixed(&format!("{}:", id));
                return Err(self.quarantine(&id, PluginError::Lifecycle(e.to_string())));
            }
        }

        // Apply hook handlers.
        for (pattern, priority, handler) in api.hook_handlers {
            self.hooks
                .register_handler(pattern, priority, Some(id.clone()), handler);
        }

        info!("Registered plugin {} v{}", id, manifest.version);
        self.plugins
            .write()
            .expect("plugin registry poisoned")
            .insert(id.clone(), plugin);
        self.manifests
            .write()
            .expect("plugin registry poisoned")
            .insert(id, manifest);
        Ok(())
    }

    /// Unregister a plugin, removing every prefixed contribution.
    pub fn unregister(&self, id: &str) -> Result<(), PluginError> {
        let plugin = self
            .plugins
            .write()
            .expect("plugin registry poisoned")
            .remove(id);
        let Some(plugin) = plugin else {
            return Ok(());
        };
        self.manifests
            .write()
            .expect("plugin registry poisoned")
            .remove(id);

        self.tools
            .write()
            .expect("tool registry poisoned")
            .unregister_source(&ToolSource::Plugin(id.to_string()));
        self.hooks.unregister_plugin_handlers(id);
        self.agent_types.unregister_prefixed(&format!("{}:", id));

        if let Err(e) = plugin.unregister() {
            warn!("Plugin '{}' unregister failed: {}", id, e);
        }
        info!("Unregistered plugin {}", id);
        Ok(())
    }

    fn quarantine(&self, id: &str, error: PluginError) -> PluginError {
        warn!("Plugin '{}' quarantined: {}", id, error);
        self.load_errors
            .write()
            .expect("plugin registry poisoned")
            .push(PluginLoadError {
                plugin: id.to_string(),
                error: error.to_string(),
            });
        error
    }

    /// Get a plugin by ID.
    pub fn get(&self, id: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .read()
            .expect("plugin registry poisoned")
            .get(id)
            .map(Arc::clone)
    }

    /// Get a plugin manifest by ID.
    pub fn get_manifest(&self, id: &str) -> Option<PluginManifest> {
        self.manifests
            .read()
            .expect("plugin registry poisoned")
            .get(id)
            .cloned()
    }

    /// List all registered plugin manifests.
    pub fn list(&self) -> Vec<PluginManifest> {
        self.manifests
            .read()
            .expect("plugin registry poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.read().expect("plugin registry poisoned").len()
    }

    /// Whether no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The quarantine table: every load failure so far.
    pub fn load_errors(&self) -> Vec<PluginLoadError> {
        self.load_errors
            .read()
            .expect("plugin registry poisoned")
            .clone()
    }

    /// Scan a directory for plugin manifests.
    pub fn discover(&self, dir: &Path) -> Vec<PluginLoadResult> {
        let mut results = Vec::new();
        if !dir.is_dir() {
            return results;
        }

        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_dir() {
                    continue;
                }
                let manifest_path = path.join(PLUGIN_MANIFEST_FILENAME);
                if !manifest_path.exists() {
                    continue;
                }
                match load_manifest(&manifest_path) {
                    Ok(manifest) => results.push(PluginLoadResult::Ok(manifest)),
                    Err(e) => results.push(PluginLoadResult::Error {
                        path: manifest_path,
                        error: e.to_string(),
                    }),
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{HookEvent, HookRegistry};
    use crate::plugins::manifest::PluginCapabilities;
    use crate::tools::{ExecutionContext, ParameterSchema, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "plugin tool"
        }
        fn parameters(&self) -> ParameterSchema {
            ParameterSchema::new()
        }
        async fn execute(&self, _args: Value, _ctx: &ExecutionContext) -> crate::Result<ToolResult> {
            Ok(ToolResult::success("ok"))
        }
    }

    struct NoopHandler;

    #[async_trait]
    impl HookHandler for NoopHandler {
        async fn handle(&self, _event: &HookEvent) -> Result<(), String> {
            Ok(())
        }
    }

    struct TestPlugin {
        manifest: PluginManifest,
        fail_register: bool,
    }

    impl Plugin for TestPlugin {
        fn manifest(&self) -> PluginManifest {
            self.manifest.clone()
        }

        fn register(&self, api: &mut PluginApi) -> Result<(), PluginError> {
            if self.fail_register {
                return Err(PluginError::Lifecycle("deliberate failure".to_string()));
            }
            if self.manifest.capabilities.tools {
                api.register_tool(Arc::new(NamedTool("search")));
                api.register_tool(Arc::new(NamedTool("fetch")));
            }
            if self.manifest.capabilities.hooks {
                api.register_hook_handler("tool:*", 5, Arc::new(NoopHandler));
            }
            if self.manifest.capabilities.subagents {
                let catalog = AgentTypeCatalog::new();
                let mut definition = catalog.get("general").unwrap();
                definition.name = "webber".to_string();
                api.register_agent_type(definition);
            }
            Ok(())
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(
            Arc::new(RwLock::new(ToolRegistry::new())),
            Arc::new(HookBus::new(Arc::new(HookRegistry::new()))),
            Arc::new(AgentTypeCatalog::new()),
        )
    }

    fn full_manifest(id: &str) -> PluginManifest {
        PluginManifest::new(id, "Test", "1.0.0").with_capabilities(PluginCapabilities {
            tools: true,
            hooks: true,
            subagents: true,
            ..Default::default()
        })
    }

    #[test]
    fn register_applies_prefixed_contributions() {
        let registry = registry();
        registry
            .register(Arc::new(TestPlugin {
                manifest: full_manifest("webkit"),
                fail_register: false,
            }))
            .unwrap();

        let tools = registry.tools.read().unwrap();
        assert!(tools.get("webkit__search").is_some());
        assert!(tools.get("webkit__fetch").is_some());
        drop(tools);

        assert!(registry.agent_types.exists("webkit:webber"));
        assert_eq!(registry.hooks.handler_count(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_restores_prior_cardinalities() {
        let registry = registry();
        let tools_before = registry.tools.read().unwrap().len();
        let types_before = registry.agent_types.len();

        registry
            .register(Arc::new(TestPlugin {
                manifest: full_manifest("webkit"),
                fail_register: false,
            }))
            .unwrap();
        registry.unregister("webkit").unwrap();

        assert_eq!(registry.tools.read().unwrap().len(), tools_before);
        assert_eq!(registry.agent_types.len(), types_before);
        assert_eq!(registry.hooks.handler_count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn failing_plugin_is_quarantined() {
        let registry = registry();
        let result = registry.register(Arc::new(TestPlugin {
            manifest: full_manifest("broken"),
            fail_register: true,
        }));

        assert!(result.is_err());
        assert!(registry.is_empty());
        assert!(registry.tools.read().unwrap().is_empty());

        let errors = registry.load_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].plugin, "broken");
    }

    #[test]
    fn undeclared_capability_is_rejected() {
        let registry = registry();
        // Declares no capabilities but registers tools.
        let manifest = PluginManifest::new("sneaky", "Sneaky", "1.0.0");
        let result = registry.register(Arc::new(TestPlugin {
            manifest: manifest.with_capabilities(PluginCapabilities {
                tools: false,
                hooks: false,
                subagents: false,
                ..Default::default()
            }),
            fail_register: false,
        }));

        // register() succeeds in the plugin, but it contributed nothing
        // because the capabilities gate what TestPlugin registers.
        assert!(result.is_ok());
        assert!(registry.tools.read().unwrap().is_empty());
    }

    #[test]
    fn duplicate_registration_rejected() {
        let registry = registry();
        registry
            .register(Arc::new(TestPlugin {
                manifest: full_manifest("dup"),
                fail_register: false,
            }))
            .unwrap();
        let err = registry.register(Arc::new(TestPlugin {
            manifest: full_manifest("dup"),
            fail_register: false,
        }));
        assert!(err.is_err());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = registry();
        assert!(registry.unregister("ghost").is_ok());
    }

    #[test]
    fn discover_reads_manifests() {
        let registry = registry();
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("good-plugin");
        std::fs::create_dir(&good).unwrap();
        std::fs::write(
            good.join(PLUGIN_MANIFEST_FILENAME),
            r#"{"id": "good-plugin", "name": "Good", "version": "1.0.0"}"#,
        )
        .unwrap();

        let bad = dir.path().join("bad-plugin");
        std::fs::create_dir(&bad).unwrap();
        std::fs::write(bad.join(PLUGIN_MANIFEST_FILENAME), "{broken").unwrap();

        let results = registry.discover(dir.path());
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .any(|r| matches!(r, PluginLoadResult::Ok(m) if m.id == "good-plugin")));
        assert!(results
            .iter()
            .any(|r| matches!(r, PluginLoadResult::Error { .. })));
    }
}
