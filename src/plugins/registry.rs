//! Plugin registry: owns plugin instances and routes command names to them.
//!
//! The registry keeps two tables that are always mutated together:
//!
//! - `plugins`: plugin name → [`PluginEntry`] (instance, metadata, state, config)
//! - `command_map`: command name → plugin name
//!
//! Only `Initialized` plugins ever enter the plugin table, and every command
//! entry points at a plugin in that table. When two plugins claim the same
//! command the later registration wins and a warning is logged; plugin
//! reloads rely on that override.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::Serialize;

use super::error::{LookupError, PluginError, RegistryError};
use super::plugin::{
    panic_message, Plugin, PluginConfig, PluginFactory, PluginMetadata, PluginStatus,
};
use crate::utilities::logger::Logger;

/// A registered plugin and its bookkeeping.
pub struct PluginEntry {
    plugin: Box<dyn Plugin>,
    metadata: PluginMetadata,
    status: PluginStatus,
    config: PluginConfig,
}

impl PluginEntry {
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn metadata(&self) -> &PluginMetadata {
        &self.metadata
    }

    pub fn status(&self) -> PluginStatus {
        self.status
    }

    /// Effective configuration (schema defaults applied).
    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn plugin(&self) -> &dyn Plugin {
        self.plugin.as_ref()
    }

    /// Healthy means initialized and passing the plugin's own probe.
    pub async fn health_check(&self) -> bool {
        self.probe_health().await.unwrap_or(false)
    }

    /// Like [`health_check`](Self::health_check), but a panicking probe is
    /// reported as `Err` carrying the panic text.
    pub async fn probe_health(&self) -> Result<bool, String> {
        if self.status != PluginStatus::Initialized {
            return Ok(false);
        }
        AssertUnwindSafe(self.plugin.health_check())
            .catch_unwind()
            .await
            .map_err(|panic| panic_message(panic.as_ref()))
    }

    /// `Loaded` → `Initialized`, or `Failed` when `initialize` errors or panics.
    async fn start(&mut self) -> Result<(), PluginError> {
        let outcome = match AssertUnwindSafe(self.plugin.initialize())
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => Err(PluginError::Initialization(format!(
                "initialize panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        self.status = match outcome {
            Ok(()) => PluginStatus::Initialized,
            Err(_) => PluginStatus::Failed,
        };
        outcome
    }

    /// Run `cleanup`, turning a panic into [`PluginError::Cleanup`].
    async fn stop(mut self) -> Result<(), PluginError> {
        match AssertUnwindSafe(self.plugin.cleanup()).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(PluginError::Cleanup(format!(
                "cleanup panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.metadata.name)
            .field("status", &self.status)
            .field("commands", &self.metadata.commands)
            .finish()
    }
}

/// Per-plugin line of [`PluginRegistry::summaries`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginSummary {
    pub name: String,
    pub version: String,
    pub commands: Vec<String>,
    pub status: PluginStatus,
    pub healthy: bool,
}

/// Central registry for plugin lifecycle and command routing.
pub struct PluginRegistry {
    plugins: BTreeMap<String, PluginEntry>,
    command_map: BTreeMap<String, String>,
    logger: Logger,
}

impl PluginRegistry {
    pub fn new(logger: Logger) -> Self {
        Self {
            plugins: BTreeMap::new(),
            command_map: BTreeMap::new(),
            logger,
        }
    }

    /// Construct a plugin from `factory` and register it.
    pub async fn register(
        &mut self,
        factory: &dyn PluginFactory,
        config: PluginConfig,
    ) -> Result<(), RegistryError> {
        let plugin = self.construct(factory, &config)?;
        self.register_instance(plugin, config).await
    }

    /// Register an already constructed plugin.
    ///
    /// Steps: read metadata, reject duplicates, validate config against the
    /// schema, `initialize`, then publish the plugin and its commands.
    /// A failure at any step leaves the registry untouched.
    pub async fn register_instance(
        &mut self,
        plugin: Box<dyn Plugin>,
        config: PluginConfig,
    ) -> Result<(), RegistryError> {
        let metadata = plugin.metadata();
        let name = metadata.name.clone();

        if self.plugins.contains_key(&name) {
            self.logger.error(format!("Plugin {} already registered", name));
            return Err(RegistryError::AlreadyRegistered(name));
        }

        self.logger.info(format!(
            "Registering plugin: {} v{}",
            name, metadata.version
        ));

        if metadata.commands.is_empty() {
            self.logger.error(format!(
                "Plugin {} declares no commands ({})",
                name,
                PluginStatus::Failed
            ));
            return Err(RegistryError::NoCommands(name));
        }

        let missing = metadata.config_schema.missing_required(&config);
        if !missing.is_empty() {
            self.logger.error(format!(
                "Plugin {} config validation failed, missing: {} ({})",
                name,
                missing.join(", "),
                PluginStatus::Failed
            ));
            return Err(RegistryError::InvalidConfig {
                plugin: name,
                missing,
            });
        }

        let mut entry = PluginEntry {
            config: metadata.config_schema.apply_defaults(&config),
            plugin,
            metadata,
            status: PluginStatus::Loaded,
        };
        self.logger.debug(format!("Plugin {} is {}", name, entry.status));
        if let Err(source) = entry.start().await {
            self.logger.error(format!(
                "Plugin {} initialization failed: {} ({})",
                name, source, entry.status
            ));
            return Err(RegistryError::InitializationFailed { plugin: name, source });
        }

        for cmd in &entry.metadata.commands {
            if let Some(previous) = self.command_map.get(cmd) {
                if previous != &name {
                    self.logger.warn(format!(
                        "Command '{}' already mapped to {}, overriding with {}",
                        cmd, previous, name
                    ));
                }
            }
            self.command_map.insert(cmd.clone(), name.clone());
            self.logger.debug(format!("  Registered command: {}", cmd));
        }

        self.logger.info(format!(
            "Plugin {} registered successfully ({} commands)",
            name,
            entry.metadata.commands.len()
        ));

        self.plugins.insert(name, entry);
        Ok(())
    }

    fn construct(
        &self,
        factory: &dyn PluginFactory,
        config: &PluginConfig,
    ) -> Result<Box<dyn Plugin>, RegistryError> {
        let logger = self.logger.child(factory.name());
        factory.create(config.clone(), logger).map_err(|source| {
            self.logger.error(format!(
                "Failed to construct plugin {}: {}",
                factory.name(),
                source
            ));
            RegistryError::Construction {
                plugin: factory.name().to_string(),
                source,
            }
        })
    }

    /// Plugin handling `command`.
    pub fn plugin_for_command(&self, command: &str) -> Result<&PluginEntry, LookupError> {
        let Some(plugin_name) = self.command_map.get(command) else {
            self.logger
                .warn(format!("No plugin found for command: {}", command));
            return Err(LookupError::Unclaimed(command.to_string()));
        };

        self.plugins.get(plugin_name).ok_or_else(|| {
            self.logger.error(format!(
                "Plugin {} registered for command {} but not found in registry",
                plugin_name, command
            ));
            LookupError::Dangling {
                command: command.to_string(),
                plugin: plugin_name.clone(),
            }
        })
    }

    pub fn get(&self, name: &str) -> Option<&PluginEntry> {
        self.plugins.get(name)
    }

    /// Metadata of every registered plugin, by name.
    pub fn list_plugins(&self) -> Vec<&PluginMetadata> {
        self.plugins.values().map(|e| &e.metadata).collect()
    }

    /// Command → plugin name, sorted by command.
    pub fn list_commands(&self) -> BTreeMap<String, String> {
        self.command_map.clone()
    }

    pub fn status(&self, name: &str) -> Option<PluginStatus> {
        self.plugins.get(name).map(|e| e.status)
    }

    /// Health of one plugin (`Some(name)`) or of all of them (`None`).
    ///
    /// An unknown name yields an empty map.
    pub async fn health_check(&self, name: Option<&str>) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();
        match name {
            Some(name) => match self.plugins.get(name) {
                Some(entry) => {
                    results.insert(name.to_string(), self.healthy(entry).await);
                }
                None => self
                    .logger
                    .warn(format!("Plugin {} not found for health check", name)),
            },
            None => {
                for (plugin_name, entry) in &self.plugins {
                    results.insert(plugin_name.clone(), self.healthy(entry).await);
                }
            }
        }
        results
    }

    async fn healthy(&self, entry: &PluginEntry) -> bool {
        match entry.probe_health().await {
            Ok(healthy) => healthy,
            Err(detail) => {
                self.logger.error(format!(
                    "Plugin {} health check panicked: {}",
                    entry.name(),
                    detail
                ));
                false
            }
        }
    }

    /// Per-plugin summary including a fresh health probe.
    pub async fn summaries(&self) -> Vec<PluginSummary> {
        let mut out = Vec::with_capacity(self.plugins.len());
        for entry in self.plugins.values() {
            out.push(PluginSummary {
                name: entry.metadata.name.clone(),
                version: entry.metadata.version.clone(),
                commands: entry.metadata.commands.clone(),
                status: entry.status,
                healthy: self.healthy(entry).await,
            });
        }
        out
    }

    /// Clean up and remove a plugin along with every command routed to it.
    ///
    /// Cleanup errors and panics are logged; the plugin is removed regardless.
    pub async fn unload(&mut self, name: &str) -> Result<(), RegistryError> {
        let Some(entry) = self.plugins.remove(name) else {
            self.logger
                .warn(format!("Plugin {} not found for unloading", name));
            return Err(RegistryError::NotFound(name.to_string()));
        };
        self.command_map.retain(|cmd, owner| {
            let keep = owner.as_str() != name;
            if !keep {
                self.logger.debug(format!("  Unregistered command: {}", cmd));
            }
            keep
        });

        self.logger.info(format!("Unloading plugin: {}", name));
        if let Err(e) = entry.stop().await {
            self.logger
                .error(format!("Error cleaning up plugin {}: {}", name, e));
        }

        self.logger
            .info(format!("Plugin {} unloaded successfully", name));
        Ok(())
    }

    /// Unload (when present) and register a fresh instance from `factory`.
    pub async fn reload(
        &mut self,
        factory: &dyn PluginFactory,
        config: PluginConfig,
    ) -> Result<(), RegistryError> {
        let plugin = self.construct(factory, &config)?;
        let name = plugin.metadata().name;

        if self.plugins.contains_key(&name) {
            if let Err(e) = self.unload(&name).await {
                self.logger
                    .error(format!("Failed to unload plugin {} for reload", name));
                return Err(e);
            }
        }

        self.register_instance(plugin, config).await
    }

    /// Unload every plugin, continuing past individual failures.
    pub async fn cleanup_all(&mut self) {
        self.logger.info("Cleaning up all plugins");
        let names: Vec<String> = self.plugins.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.unload(&name).await {
                self.logger.error(format!("Failed to unload {}: {}", name, e));
            }
        }
        self.logger.info("All plugins cleaned up");
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    pub fn command_count(&self) -> usize {
        self.command_map.len()
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.keys().collect::<Vec<_>>())
            .field("commands", &self.command_map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::error::PluginError;
    use crate::plugins::plugin::{factory_fn, CommandContext, ConfigSchema, FieldKind, PluginResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Configurable test plugin that counts lifecycle calls.
    struct TestPlugin {
        metadata: PluginMetadata,
        init_ok: bool,
        cleanup_ok: bool,
        healthy: bool,
        panics_in: Option<&'static str>,
        cleanups: Arc<AtomicUsize>,
    }

    impl TestPlugin {
        fn new(name: &str, commands: &[&str]) -> Self {
            Self {
                metadata: PluginMetadata::new(name, "1.0.0", &format!("{} plugin", name), commands),
                init_ok: true,
                cleanup_ok: true,
                healthy: true,
                panics_in: None,
                cleanups: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn metadata(&self) -> PluginMetadata {
            self.metadata.clone()
        }

        async fn initialize(&mut self) -> Result<(), PluginError> {
            if self.panics_in == Some("initialize") {
                panic!("driver missing");
            }
            if self.init_ok {
                Ok(())
            } else {
                Err(PluginError::ConnectionFailed("backend down".into()))
            }
        }

        async fn execute(&self, _ctx: &CommandContext) -> Result<PluginResult, PluginError> {
            Ok(PluginResult::success(self.metadata.name.clone()))
        }

        async fn cleanup(&mut self) -> Result<(), PluginError> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            if self.panics_in == Some("cleanup") {
                panic!("handle poisoned");
            }
            if self.cleanup_ok {
                Ok(())
            } else {
                Err(PluginError::Cleanup("socket stuck".into()))
            }
        }

        async fn health_check(&self) -> bool {
            if self.panics_in == Some("health_check") {
                panic!("probe crashed");
            }
            self.healthy
        }
    }

    fn registry() -> PluginRegistry {
        PluginRegistry::new(Logger::silent())
    }

    async fn add(reg: &mut PluginRegistry, plugin: TestPlugin) -> Result<(), RegistryError> {
        reg.register_instance(Box::new(plugin), PluginConfig::new()).await
    }

    #[tokio::test]
    async fn test_register_maps_commands() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("weather", &["get_weather", "forecast"]))
            .await
            .unwrap();

        assert_eq!(reg.plugin_count(), 1);
        assert_eq!(reg.command_count(), 2);
        assert_eq!(reg.status("weather"), Some(PluginStatus::Initialized));
        assert_eq!(reg.plugin_for_command("forecast").unwrap().name(), "weather");
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected_without_mutation() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("weather", &["get_weather"])).await.unwrap();

        let err = add(&mut reg, TestPlugin::new("weather", &["other_cmd"]))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(ref n) if n == "weather"));
        assert!(reg.plugin_for_command("other_cmd").is_err());
        assert_eq!(reg.command_count(), 1);
    }

    #[tokio::test]
    async fn test_conflicting_command_last_registration_wins() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("first", &["x", "only_first"])).await.unwrap();
        add(&mut reg, TestPlugin::new("second", &["x"])).await.unwrap();

        assert_eq!(reg.plugin_for_command("x").unwrap().name(), "second");
        // First plugin stays reachable through its other commands.
        assert_eq!(reg.plugin_for_command("only_first").unwrap().name(), "first");
        assert_eq!(reg.plugin_count(), 2);

        let commands = reg.list_commands();
        assert_eq!(commands.get("x").map(String::as_str), Some("second"));
    }

    #[tokio::test]
    async fn test_missing_required_config_fails_registration() {
        let mut reg = registry();
        let mut plugin = TestPlugin::new("movies", &["download_movie"]);
        plugin.metadata.config_schema = ConfigSchema::new()
            .required("radarr_url", FieldKind::String)
            .optional("auto_search", FieldKind::Boolean, json!(true));

        let err = reg
            .register_instance(Box::new(plugin), PluginConfig::new())
            .await
            .unwrap_err();
        match err {
            RegistryError::InvalidConfig { plugin, missing } => {
                assert_eq!(plugin, "movies");
                assert_eq!(missing, vec!["radarr_url".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(reg.plugin_count(), 0);
        assert!(reg.plugin_for_command("download_movie").is_err());
    }

    #[tokio::test]
    async fn test_effective_config_gets_defaults() {
        let mut reg = registry();
        let mut plugin = TestPlugin::new("movies", &["download_movie"]);
        plugin.metadata.config_schema = ConfigSchema::new()
            .required("radarr_url", FieldKind::String)
            .optional("auto_search", FieldKind::Boolean, json!(true));

        let mut config = PluginConfig::new();
        config.insert("radarr_url".into(), json!("http://radarr"));
        reg.register_instance(Box::new(plugin), config).await.unwrap();

        let entry = reg.get("movies").unwrap();
        assert_eq!(entry.config()["auto_search"], json!(true));
        assert_eq!(entry.config()["radarr_url"], json!("http://radarr"));
    }

    #[tokio::test]
    async fn test_failed_initialize_leaves_registry_unchanged() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("ok", &["ping"])).await.unwrap();

        let mut broken = TestPlugin::new("broken", &["ping", "broken_cmd"]);
        broken.init_ok = false;
        let err = add(&mut reg, broken).await.unwrap_err();

        assert!(matches!(err, RegistryError::InitializationFailed { .. }));
        assert_eq!(reg.status("broken"), None);
        assert_eq!(reg.plugin_for_command("ping").unwrap().name(), "ok");
        assert!(reg.plugin_for_command("broken_cmd").is_err());
    }

    #[tokio::test]
    async fn test_plugin_without_commands_rejected() {
        let mut reg = registry();
        let err = add(&mut reg, TestPlugin::new("empty", &[])).await.unwrap_err();
        assert!(matches!(err, RegistryError::NoCommands(_)));
        assert_eq!(reg.plugin_count(), 0);
    }

    #[tokio::test]
    async fn test_unload_removes_all_command_mappings() {
        let mut reg = registry();
        let plugin = TestPlugin::new("weather", &["get_weather", "forecast"]);
        let cleanups = plugin.cleanups.clone();
        add(&mut reg, plugin).await.unwrap();
        add(&mut reg, TestPlugin::new("other", &["ping"])).await.unwrap();

        reg.unload("weather").await.unwrap();

        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(
            reg.plugin_for_command("get_weather").unwrap_err(),
            LookupError::Unclaimed("get_weather".into())
        );
        assert!(reg.plugin_for_command("forecast").is_err());
        assert_eq!(reg.plugin_for_command("ping").unwrap().name(), "other");
        assert_eq!(reg.status("weather"), None);
    }

    #[tokio::test]
    async fn test_unload_keeps_commands_overridden_by_others() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("first", &["x", "y"])).await.unwrap();
        add(&mut reg, TestPlugin::new("second", &["x"])).await.unwrap();

        reg.unload("first").await.unwrap();
        assert_eq!(reg.plugin_for_command("x").unwrap().name(), "second");
        assert!(reg.plugin_for_command("y").is_err());
    }

    #[tokio::test]
    async fn test_unload_succeeds_even_if_cleanup_fails() {
        let mut reg = registry();
        let mut plugin = TestPlugin::new("sticky", &["stick"]);
        plugin.cleanup_ok = false;
        add(&mut reg, plugin).await.unwrap();

        reg.unload("sticky").await.unwrap();
        assert_eq!(reg.plugin_count(), 0);
        assert_eq!(reg.command_count(), 0);
    }

    #[tokio::test]
    async fn test_unload_unknown_plugin() {
        let mut reg = registry();
        assert!(matches!(
            reg.unload("ghost").await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_health_check_single_and_all() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("up", &["a"])).await.unwrap();
        let mut down = TestPlugin::new("down", &["b"]);
        down.healthy = false;
        add(&mut reg, down).await.unwrap();

        let all = reg.health_check(None).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all["up"], true);
        assert_eq!(all["down"], false);

        let one = reg.health_check(Some("up")).await;
        assert_eq!(one.len(), 1);
        assert!(reg.health_check(Some("ghost")).await.is_empty());
    }

    #[tokio::test]
    async fn test_reload_replaces_instance() {
        let mut reg = registry();
        let generation = Arc::new(AtomicUsize::new(0));
        let counter = generation.clone();
        let factory = factory_fn("weather", move |_config, _logger| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let commands: &[&str] = if n == 0 { &["get_weather"] } else { &["get_weather", "forecast"] };
            Ok(Box::new(TestPlugin::new("weather", commands)) as Box<dyn Plugin>)
        });

        reg.register(&factory, PluginConfig::new()).await.unwrap();
        assert!(reg.plugin_for_command("forecast").is_err());

        reg.reload(&factory, PluginConfig::new()).await.unwrap();
        assert_eq!(generation.load(Ordering::SeqCst), 2);
        assert_eq!(reg.plugin_count(), 1);
        assert_eq!(reg.plugin_for_command("forecast").unwrap().name(), "weather");
    }

    #[tokio::test]
    async fn test_factory_failure_reported_as_construction_error() {
        let mut reg = registry();
        let factory = factory_fn("broken", |_config, _logger| {
            Err(PluginError::InvalidConfig("bad url".into()))
        });
        let err = reg.register(&factory, PluginConfig::new()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Construction { ref plugin, .. } if plugin == "broken"));
    }

    #[tokio::test]
    async fn test_cleanup_all_unloads_everything() {
        let mut reg = registry();
        let a = TestPlugin::new("a", &["a"]);
        let b = TestPlugin::new("b", &["b"]);
        let (ca, cb) = (a.cleanups.clone(), b.cleanups.clone());
        add(&mut reg, a).await.unwrap();
        add(&mut reg, b).await.unwrap();

        reg.cleanup_all().await;
        assert_eq!(reg.plugin_count(), 0);
        assert_eq!(reg.command_count(), 0);
        assert_eq!(ca.load(Ordering::SeqCst) + cb.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_initialize_is_a_failed_registration() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("ok", &["ping"])).await.unwrap();

        let mut broken = TestPlugin::new("broken", &["ping", "broken_cmd"]);
        broken.panics_in = Some("initialize");
        let err = add(&mut reg, broken).await.unwrap_err();

        match err {
            RegistryError::InitializationFailed { plugin, source } => {
                assert_eq!(plugin, "broken");
                assert!(source.to_string().contains("driver missing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(reg.status("broken"), None);
        assert_eq!(reg.plugin_for_command("ping").unwrap().name(), "ok");
        assert!(reg.plugin_for_command("broken_cmd").is_err());
    }

    #[tokio::test]
    async fn test_cleanup_all_continues_past_panicking_cleanup() {
        let mut reg = registry();
        let mut a = TestPlugin::new("a", &["a"]);
        a.panics_in = Some("cleanup");
        let b = TestPlugin::new("b", &["b"]);
        let (ca, cb) = (a.cleanups.clone(), b.cleanups.clone());
        add(&mut reg, a).await.unwrap();
        add(&mut reg, b).await.unwrap();

        reg.cleanup_all().await;
        assert_eq!(ca.load(Ordering::SeqCst), 1);
        assert_eq!(cb.load(Ordering::SeqCst), 1);
        assert_eq!(reg.plugin_count(), 0);
        assert_eq!(reg.command_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_health_probe_reads_as_unhealthy() {
        let mut reg = registry();
        add(&mut reg, TestPlugin::new("up", &["a"])).await.unwrap();
        let mut flaky = TestPlugin::new("flaky", &["b"]);
        flaky.panics_in = Some("health_check");
        add(&mut reg, flaky).await.unwrap();

        let all = reg.health_check(None).await;
        assert_eq!(all["up"], true);
        assert_eq!(all["flaky"], false);

        let entry = reg.get("flaky").unwrap();
        assert!(entry.probe_health().await.unwrap_err().contains("probe crashed"));

        let summaries = reg.summaries().await;
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].healthy);
        assert_eq!(summaries[0].name, "flaky");
    }
}
