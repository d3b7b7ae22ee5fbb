//! Plugin contract: the interface every capability module implements.
//!
//! A plugin is long-lived and stateful: it holds its configuration and any
//! client handles it needs. The registry owns it for its whole lifetime and
//! drives it through `initialize()` → `execute()`* → `cleanup()`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::PluginError;
use crate::normalizer::StructuredCommand;
use crate::utilities::logger::Logger;

/// Plugin configuration: an open map of settings.
pub type PluginConfig = HashMap<String, Value>;

/// Lowest `priority` value wins. Only informational for now.
pub const DEFAULT_PRIORITY: u32 = 100;

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Plugin lifecycle state, tracked by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginStatus {
    Unloaded,
    Loaded,
    Initialized,
    Failed,
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loaded => "loaded",
            Self::Initialized => "initialized",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Configuration schema
// ---------------------------------------------------------------------------

/// Expected JSON type of a configuration field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

/// Declaration of a single configuration field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// Declarative configuration schema: field name → spec.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required field.
    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSpec {
                kind,
                required: true,
                default: None,
            },
        );
        self
    }

    /// Declare an optional field with a default value.
    pub fn optional(mut self, name: &str, kind: FieldKind, default: Value) -> Self {
        self.fields.insert(
            name.to_string(),
            FieldSpec {
                kind,
                required: false,
                default: Some(default),
            },
        );
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Required keys absent from `config`, in name order.
    pub fn missing_required(&self, config: &PluginConfig) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(name, spec)| spec.required && !config.contains_key(name.as_str()))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Copy of `config` with defaults filled in for absent optional fields.
    pub fn apply_defaults(&self, config: &PluginConfig) -> PluginConfig {
        let mut effective = config.clone();
        for (name, spec) in &self.fields {
            if let Some(default) = &spec.default {
                effective
                    .entry(name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        effective
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Immutable plugin descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginMetadata {
    /// Unique registry key.
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    pub description: String,
    /// Command names this plugin handles. Must not be empty.
    pub commands: Vec<String>,
    #[serde(default)]
    pub config_schema: ConfigSchema,
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    DEFAULT_PRIORITY
}

impl PluginMetadata {
    pub fn new(name: &str, version: &str, description: &str, commands: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            author: String::new(),
            description: description.to_string(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            config_schema: ConfigSchema::default(),
            priority: DEFAULT_PRIORITY,
        }
    }

    pub fn with_author(mut self, author: &str) -> Self {
        self.author = author.to_string();
        self
    }

    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.config_schema = schema;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

// ---------------------------------------------------------------------------
// Execution context & result
// ---------------------------------------------------------------------------

/// Everything a plugin gets to execute one command.
///
/// Built fresh by the dispatcher for every command and dropped afterwards.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub sender: String,
    pub subject: String,
    /// Original message body.
    pub body: String,
    pub command: StructuredCommand,
    pub timestamp: DateTime<Utc>,
    /// Effective plugin configuration (schema defaults applied).
    pub config: PluginConfig,
    pub logger: Logger,
}

impl CommandContext {
    /// The command's action name.
    pub fn action(&self) -> Option<&str> {
        self.command.action()
    }

    /// A string field of the command.
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command.get(key).and_then(Value::as_str)
    }
}

/// Outcome of handling one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    pub success: bool,
    /// Human-readable summary, always present.
    pub message: String,
    /// Auxiliary machine-readable fields.
    #[serde(default)]
    pub data: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl PluginResult {
    pub fn new(success: bool, message: impl Into<String>) -> Self {
        Self {
            success,
            message: message.into(),
            data: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(true, message)
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(false, message)
    }

    /// Attach a data field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// String data field, if present.
    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

// ---------------------------------------------------------------------------
// Plugin trait
// ---------------------------------------------------------------------------

/// The capability-module contract.
///
/// Lifecycle is owned by the registry: `initialize` is called exactly once per
/// registration, `execute` once per routed command, `cleanup` on unload.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Plugin descriptor. Pure; callable before `initialize`.
    fn metadata(&self) -> PluginMetadata;

    /// Acquire resources and validate reachability of external services.
    async fn initialize(&mut self) -> Result<(), PluginError>;

    /// Handle one command.
    ///
    /// Domain failures are returned as `Ok` with `success == false`. `Err` is
    /// reserved for faults the plugin did not expect.
    async fn execute(&self, ctx: &CommandContext) -> Result<PluginResult, PluginError>;

    /// Release resources. Best-effort; failures are logged by the registry.
    async fn cleanup(&mut self) -> Result<(), PluginError>;

    /// Probe external dependencies.
    ///
    /// The registry only calls this for plugins in the `Initialized` state, so
    /// the default has nothing extra to check.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Builds plugin instances from configuration.
pub trait PluginFactory: Send + Sync {
    /// Name of the plugin this factory builds (used in diagnostics).
    fn name(&self) -> &str;

    /// Construct a plugin holding `config`.
    fn create(&self, config: PluginConfig, logger: Logger) -> Result<Box<dyn Plugin>, PluginError>;
}

/// [`PluginFactory`] backed by a closure.
pub struct FnPluginFactory<F> {
    name: String,
    build: F,
}

impl<F> PluginFactory for FnPluginFactory<F>
where
    F: Fn(PluginConfig, Logger) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, config: PluginConfig, logger: Logger) -> Result<Box<dyn Plugin>, PluginError> {
        (self.build)(config, logger)
    }
}

/// Wrap a closure as a [`PluginFactory`].
pub fn factory_fn<F>(name: &str, build: F) -> FnPluginFactory<F>
where
    F: Fn(PluginConfig, Logger) -> Result<Box<dyn Plugin>, PluginError> + Send + Sync,
{
    FnPluginFactory {
        name: name.to_string(),
        build,
    }
}

/// Client handle of a plugin that must be initialized before use.
pub(crate) fn require_initialized<'a, T>(
    value: Option<&'a T>,
    plugin: &str,
) -> Result<&'a T, PluginError> {
    value.ok_or_else(|| PluginError::NotInitialized(plugin.to_string()))
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
