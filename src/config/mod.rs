//! Layered YAML configuration.
//!
//! Files are read from a config directory and merged in order, later files
//! overriding earlier ones:
//!
//! 1. `base.yaml`: required
//! 2. `{env}.yaml`: environment overrides (optional)
//! 3. `secrets.yaml`: credentials (optional)
//!
//! After merging, `${VAR}` placeholders inside string values are replaced with
//! environment variables.
//!
//! ```yaml
//! llm:
//!   host: "http://localhost:11434"
//!   model: "qwen3:8b"
//! plugins:
//!   enabled: [ping, movie_download]
//!   movie_download:
//!     radarr_url: "http://localhost:7878/api/v3"
//!     radarr_api_key: "${RADARR_API_KEY}"
//!     root_folder: "/movies"
//! ```

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use thiserror::Error;

use crate::plugins::PluginConfig;

static ENV_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    Missing(PathBuf),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Typed sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSettings {
    pub app_name: String,
    pub log_level: String,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            app_name: "HomeMaid".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/homemaid.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub host: String,
    pub model: String,
    pub system_prompt: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen3:8b".to_string(),
            system_prompt: None,
            timeout_secs: 120,
        }
    }
}

/// Which [`MessageTransport`](crate::transport::MessageTransport) the
/// application loop polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process mailbox, fed by the embedding program.
    #[default]
    Memory,
    /// IMAP for unread mail, SMTP for replies.
    Mail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailSettings {
    pub imap_server: String,
    pub imap_port: u16,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

impl Default for MailSettings {
    fn default() -> Self {
        Self {
            imap_server: String::new(),
            imap_port: 993,
            smtp_server: String::new(),
            smtp_port: 587,
            username: String::new(),
            password: String::new(),
            mailbox: "INBOX".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub kind: TransportKind,
    pub poll_interval_secs: u64,
    pub fetch_limit: usize,
    /// Empty means everyone is allowed.
    pub allowed_senders: Vec<String>,
    pub mail: MailSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            kind: TransportKind::Memory,
            poll_interval_secs: 30,
            fetch_limit: 5,
            allowed_senders: Vec::new(),
            mail: MailSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8088".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Plugins to register at start-up, in order.
    pub enabled: Vec<String>,
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub system: SystemSettings,
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub transport: TransportSettings,
    pub server: ServerSettings,
    pub plugins: PluginSettings,
}

// ---------------------------------------------------------------------------
// ConfigManager
// ---------------------------------------------------------------------------

/// Loads and queries the merged configuration tree.
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
    root: YamlValue,
}

impl ConfigManager {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            root: YamlValue::Mapping(Mapping::new()),
        }
    }

    /// Build directly from a YAML document (no file layering).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let root = serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        let mut manager = Self {
            config_dir: PathBuf::new(),
            root,
        };
        manager.root = substitute_env_vars(std::mem::take(&mut manager.root));
        Ok(manager)
    }

    /// Load `base.yaml`, `{env}.yaml` and `secrets.yaml` from the config dir.
    pub fn load(&mut self, env: &str) -> Result<(), ConfigError> {
        let base = self
            .read_yaml("base.yaml")?
            .ok_or_else(|| ConfigError::Missing(self.config_dir.join("base.yaml")))?;
        let env_layer = self.read_yaml(&format!("{}.yaml", env))?;
        let secrets = self.read_yaml("secrets.yaml")?;

        let mut merged = base;
        for layer in [env_layer, secrets].into_iter().flatten() {
            merged = deep_merge(merged, layer);
        }

        self.root = substitute_env_vars(merged);
        log::info!("Configuration loaded for environment: {}", env);
        Ok(())
    }

    /// Discard the current tree and load again.
    pub fn reload(&mut self, env: &str) -> Result<(), ConfigError> {
        self.root = YamlValue::Mapping(Mapping::new());
        self.load(env)
    }

    fn read_yaml(&self, file_name: &str) -> Result<Option<YamlValue>, ConfigError> {
        let path = self.config_dir.join(file_name);
        if !path.exists() {
            log::warn!("Configuration file not found: {}", path.display());
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let value: YamlValue =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.clone(),
                source,
            })?;
        log::debug!("Loaded configuration from {}", path.display());
        // An empty file parses as null; treat it as an empty mapping.
        Ok(Some(match value {
            YamlValue::Null => YamlValue::Mapping(Mapping::new()),
            other => other,
        }))
    }

    /// Look up a value by dotted path (`"llm.model"`).
    pub fn get(&self, key_path: &str) -> Option<&YamlValue> {
        key_path
            .split('.')
            .try_fold(&self.root, |node, key| node.as_mapping()?.get(key))
    }

    /// Typed lookup by dotted path.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key_path: &str) -> Option<T> {
        self.get(key_path)
            .and_then(|v| serde_yaml::from_value(v.clone()).ok())
    }

    /// The `plugins.<name>` section as a plugin configuration map.
    pub fn plugin_config(&self, plugin_name: &str) -> PluginConfig {
        self.get(&format!("plugins.{}", plugin_name))
            .and_then(|v| serde_json::to_value(v).ok())
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    /// Deserialize the typed application view.
    pub fn app_config(&self) -> Result<AppConfig, ConfigError> {
        serde_yaml::from_value(self.root.clone())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The whole merged tree.
    pub fn root(&self) -> &YamlValue {
        &self.root
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }
}

/// Recursively merge `overlay` into `base`; mappings merge, everything else replaces.
fn deep_merge(base: YamlValue, overlay: YamlValue) -> YamlValue {
    match (base, overlay) {
        (YamlValue::Mapping(mut base_map), YamlValue::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base_map.insert(key, merged);
            }
            YamlValue::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Replace `${VAR}` in every string. Unset variables are left as-is.
fn substitute_env_vars(value: YamlValue) -> YamlValue {
    match value {
        YamlValue::String(s) => YamlValue::String(substitute_str(&s)),
        YamlValue::Sequence(items) => {
            YamlValue::Sequence(items.into_iter().map(substitute_env_vars).collect())
        }
        YamlValue::Mapping(map) => YamlValue::Mapping(
            map.into_iter()
                .map(|(k, v)| (k, substitute_env_vars(v)))
                .collect(),
        ),
        other => other,
    }
}

fn substitute_str(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    log::warn!("Environment variable {} not found", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "base.yaml",
            "llm:\n  model: base-model\n  host: http://base\ntransport:\n  poll_interval_secs: 30\n",
        );
        write(dir.path(), "development.yaml", "llm:\n  model: dev-model\n");
        write(dir.path(), "secrets.yaml", "transport:\n  allowed_senders: [me@home.lan]\n");

        let mut config = ConfigManager::new(dir.path());
        config.load("development").unwrap();

        let app = config.app_config().unwrap();
        assert_eq!(app.llm.model, "dev-model");
        assert_eq!(app.llm.host, "http://base");
        assert_eq!(app.transport.poll_interval_secs, 30);
        assert_eq!(app.transport.allowed_senders, vec!["me@home.lan".to_string()]);
        // Untouched sections fall back to defaults.
        assert_eq!(app.database.path, PathBuf::from("data/homemaid.db"));
    }

    #[test]
    fn test_missing_base_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ConfigManager::new(dir.path());
        assert!(matches!(config.load("production"), Err(ConfigError::Missing(_))));
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("HOMEMAID_TEST_API_KEY", "s3cret");
        let config = ConfigManager::from_yaml_str(
            "plugins:\n  movie_download:\n    radarr_api_key: \"${HOMEMAID_TEST_API_KEY}\"\n    other: \"${HOMEMAID_TEST_UNSET_VAR}\"\n",
        )
        .unwrap();

        let plugin = config.plugin_config("movie_download");
        assert_eq!(plugin["radarr_api_key"], json!("s3cret"));
        assert_eq!(plugin["other"], json!("${HOMEMAID_TEST_UNSET_VAR}"));
    }

    #[test]
    fn test_dotted_get_and_plugin_config() {
        let config = ConfigManager::from_yaml_str(
            "plugins:\n  enabled: [ping]\n  movie_download:\n    quality_profile_id: 4\n    auto_search: false\n",
        )
        .unwrap();

        assert_eq!(config.get_as::<Vec<String>>("plugins.enabled"), Some(vec!["ping".to_string()]));
        assert!(config.get("plugins.nope.deeper").is_none());

        let plugin = config.plugin_config("movie_download");
        assert_eq!(plugin["quality_profile_id"], json!(4));
        assert_eq!(plugin["auto_search"], json!(false));
        assert!(config.plugin_config("absent").is_empty());
    }

    #[test]
    fn test_mail_transport_section() {
        let config = ConfigManager::from_yaml_str(
            "transport:\n  kind: mail\n  mail:\n    imap_server: imap.home.lan\n    smtp_server: smtp.home.lan\n    username: maid@home.lan\n",
        )
        .unwrap();

        let transport = config.app_config().unwrap().transport;
        assert_eq!(transport.kind, TransportKind::Mail);
        assert_eq!(transport.mail.imap_server, "imap.home.lan");
        assert_eq!(transport.mail.imap_port, 993);
        assert_eq!(transport.mail.smtp_port, 587);
        assert_eq!(transport.mail.mailbox, "INBOX");

        let default = AppConfig::default().transport;
        assert_eq!(default.kind, TransportKind::Memory);
    }
}
