//! Capability modules (plugins) and the registry that routes commands to them.

pub mod builtin;
pub mod catalog;
pub mod error;
pub mod movie_download;
pub mod plugin;
pub mod registry;

pub use error::{LookupError, PluginError, RegistryError};
pub use plugin::{
    factory_fn, CommandContext, ConfigSchema, FieldKind, FieldSpec, FnPluginFactory, Plugin,
    PluginConfig, PluginFactory, PluginMetadata, PluginResult, PluginStatus, DEFAULT_PRIORITY,
};
pub use registry::{PluginEntry, PluginRegistry, PluginSummary};
