//! Plugin and registry errors.

use thiserror::Error;

/// Unexpected fault raised by a plugin.
///
/// Expected domain failures ("movie not found") are not errors: plugins return
/// them as an unsuccessful [`PluginResult`](super::PluginResult). A
/// `PluginError` means something went wrong that the plugin did not plan for.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Plugin configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An external dependency could not be reached.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Initialization did not complete.
    #[error("Initialization failed: {0}")]
    Initialization(String),

    /// Command execution hit an unexpected condition.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Resource release failed.
    #[error("Cleanup failed: {0}")]
    Cleanup(String),

    /// Plugin used before `initialize` succeeded.
    #[error("Plugin not initialized: {0}")]
    NotInitialized(String),
}

/// Errors reported synchronously by [`PluginRegistry`](super::PluginRegistry).
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A plugin with the same name is already registered.
    #[error("Plugin '{0}' is already registered")]
    AlreadyRegistered(String),

    /// The plugin declares no commands.
    #[error("Plugin '{0}' declares no commands")]
    NoCommands(String),

    /// Required configuration keys are missing.
    #[error("Plugin '{plugin}' config validation failed: missing required key(s) {}", .missing.join(", "))]
    InvalidConfig { plugin: String, missing: Vec<String> },

    /// The factory could not construct the plugin.
    #[error("Failed to construct plugin '{plugin}': {source}")]
    Construction {
        plugin: String,
        #[source]
        source: PluginError,
    },

    /// `initialize` failed.
    #[error("Plugin '{plugin}' initialization failed: {source}")]
    InitializationFailed {
        plugin: String,
        #[source]
        source: PluginError,
    },

    /// No plugin with that name is registered.
    #[error("Plugin '{0}' not found")]
    NotFound(String),
}

/// Why a command lookup found nothing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// No plugin claims the command.
    #[error("No plugin handles command '{0}'")]
    Unclaimed(String),

    /// The command map points at a plugin missing from the plugin table.
    #[error("Command '{command}' maps to plugin '{plugin}' which is not registered")]
    Dangling { command: String, plugin: String },
}
