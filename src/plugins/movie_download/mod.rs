//! `movie_download` plugin: adds movies to a Radarr library.
//!
//! Handles `download_movie` / `add_movie` (look up, de-duplicate, add) and
//! `search_movie` (list the best matches). Anything that goes wrong while
//! talking to Radarr is reported as an unsuccessful result with the error
//! text under `data.error`, never as an engine fault.

pub mod radarr_client;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::error::PluginError;
use super::plugin::{
    factory_fn, require_initialized, CommandContext, ConfigSchema, FieldKind, FnPluginFactory,
    Plugin, PluginConfig, PluginMetadata, PluginResult,
};
use crate::utilities::logger::Logger;
pub use radarr_client::{AddOptions, Movie, RadarrClient, RadarrError};

pub const MOVIE_DOWNLOAD_PLUGIN: &str = "movie_download";

/// Number of matches listed by `search_movie`.
const SEARCH_LIST_LIMIT: usize = 5;

fn default_quality_profile() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    10
}

/// Typed view of the plugin configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MovieSettings {
    pub radarr_url: String,
    pub radarr_api_key: String,
    pub root_folder: String,
    #[serde(default = "default_quality_profile")]
    pub quality_profile_id: i64,
    #[serde(default = "default_true")]
    pub auto_search: bool,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl MovieSettings {
    pub fn from_config(config: &PluginConfig) -> Result<Self, PluginError> {
        let object: serde_json::Map<String, Value> =
            config.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        serde_json::from_value(Value::Object(object))
            .map_err(|e| PluginError::InvalidConfig(e.to_string()))
    }
}

pub struct MovieDownloadPlugin {
    config: PluginConfig,
    settings: Option<MovieSettings>,
    client: Option<RadarrClient>,
    logger: Logger,
}

impl MovieDownloadPlugin {
    pub fn new(config: PluginConfig, logger: Logger) -> Self {
        Self {
            config,
            settings: None,
            client: None,
            logger,
        }
    }

    pub fn schema() -> ConfigSchema {
        ConfigSchema::new()
            .required("radarr_url", FieldKind::String)
            .required("radarr_api_key", FieldKind::String)
            .required("root_folder", FieldKind::String)
            .optional("quality_profile_id", FieldKind::Integer, json!(1))
            .optional("auto_search", FieldKind::Boolean, json!(true))
            .optional("timeout_secs", FieldKind::Integer, json!(10))
    }

    fn ready(&self) -> Result<(&RadarrClient, &MovieSettings), PluginError> {
        let client = require_initialized(self.client.as_ref(), MOVIE_DOWNLOAD_PLUGIN)?;
        let settings = require_initialized(self.settings.as_ref(), MOVIE_DOWNLOAD_PLUGIN)?;
        Ok((client, settings))
    }

    async fn handle_add(&self, ctx: &CommandContext) -> Result<PluginResult, PluginError> {
        let (client, settings) = self.ready()?;
        let Some(title) = ctx.arg_str("title").filter(|t| !t.trim().is_empty()) else {
            return Ok(PluginResult::failure("No movie title given")
                .with("parsed_command", ctx.command.as_value().clone()));
        };
        self.logger.info(format!("Adding movie: {}", title));

        let results = match client.search_movie(title).await {
            Ok(results) => results,
            Err(e) => return Ok(radarr_failure(format!("Searching for '{}' failed", title), e)),
        };
        let Some(movie) = results.into_iter().next() else {
            return Ok(PluginResult::failure(format!(
                "Movie '{}' not found, check the spelling or try the English title",
                title
            ))
            .with("title", title)
            .with("search_results", 0));
        };

        if let Some(tmdb_id) = movie.tmdb_id {
            match client.movie_by_tmdb_id(tmdb_id).await {
                Ok(Some(_)) => {
                    return Ok(PluginResult::failure(format!(
                        "{} is already in the download queue",
                        movie.display_name()
                    ))
                    .with("title", movie.title.as_str())
                    .with("year", movie.year)
                    .with("status", "already_exists"));
                }
                Ok(None) => {}
                Err(e) => self
                    .logger
                    .warn(format!("Error checking if movie exists: {}", e)),
            }
        }

        let options = AddOptions {
            root_folder: &settings.root_folder,
            quality_profile_id: settings.quality_profile_id,
            search_now: settings.auto_search,
        };
        match client.add_movie(&movie, &options).await {
            Ok(_) => Ok(PluginResult::success(format!(
                "{} added to the download queue",
                movie.display_name()
            ))
            .with("title", movie.title.as_str())
            .with("year", movie.year)
            .with("tmdb_id", movie.tmdb_id)
            .with("auto_search", settings.auto_search)),
            Err(e) => Ok(radarr_failure(
                format!("Failed to add {}", movie.display_name()),
                e,
            )
            .with("title", movie.title.as_str())
            .with("year", movie.year)),
        }
    }

    async fn handle_search(&self, ctx: &CommandContext) -> Result<PluginResult, PluginError> {
        let (client, _) = self.ready()?;
        let Some(title) = ctx.arg_str("title").filter(|t| !t.trim().is_empty()) else {
            return Ok(PluginResult::failure("No movie title given")
                .with("parsed_command", ctx.command.as_value().clone()));
        };

        let results = match client.search_movie(title).await {
            Ok(results) => results,
            Err(e) => return Ok(radarr_failure(format!("Searching for '{}' failed", title), e)),
        };
        if results.is_empty() {
            return Ok(PluginResult::failure(format!("Movie '{}' not found", title))
                .with("title", title)
                .with("search_results", 0));
        }

        let lines: Vec<String> = results
            .iter()
            .take(SEARCH_LIST_LIMIT)
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.display_name()))
            .collect();
        let mut message = format!("Found {} movie(s):\n\n{}", results.len(), lines.join("\n"));
        if results.len() > SEARCH_LIST_LIMIT {
            message.push_str(&format!(
                "\n\n...and {} more",
                results.len() - SEARCH_LIST_LIMIT
            ));
        }

        let top: Vec<Value> = results
            .iter()
            .take(SEARCH_LIST_LIMIT)
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();
        Ok(PluginResult::success(message)
            .with("title", title)
            .with("total_results", results.len())
            .with("results", top))
    }
}

fn radarr_failure(message: String, error: RadarrError) -> PluginResult {
    PluginResult::failure(format!("{}: {}", message, error)).with("error", error.to_string())
}

#[async_trait]
impl Plugin for MovieDownloadPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(
            MOVIE_DOWNLOAD_PLUGIN,
            "1.0.0",
            "Download movies through Radarr",
            &["download_movie", "add_movie", "search_movie"],
        )
        .with_author("HomeMaid")
        .with_schema(Self::schema())
    }

    async fn initialize(&mut self) -> Result<(), PluginError> {
        let settings = MovieSettings::from_config(&Self::schema().apply_defaults(&self.config))?;
        let client = RadarrClient::new(
            &settings.radarr_url,
            &settings.radarr_api_key,
            Duration::from_secs(settings.timeout_secs),
            self.logger.clone(),
        )
        .map_err(|e| PluginError::Initialization(e.to_string()))?;

        client
            .system_status()
            .await
            .map_err(|e| PluginError::ConnectionFailed(e.to_string()))?;

        self.settings = Some(settings);
        self.client = Some(client);
        self.logger.info("MovieDownloadPlugin initialized successfully");
        Ok(())
    }

    async fn execute(&self, ctx: &CommandContext) -> Result<PluginResult, PluginError> {
        match ctx.action() {
            Some("download_movie") | Some("add_movie") => self.handle_add(ctx).await,
            Some("search_movie") => self.handle_search(ctx).await,
            other => Ok(PluginResult::failure(format!(
                "Unsupported command: {}",
                other.unwrap_or("<none>")
            ))
            .with("action", other)),
        }
    }

    async fn cleanup(&mut self) -> Result<(), PluginError> {
        self.client = None;
        self.logger.info("MovieDownloadPlugin cleaned up");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        match &self.client {
            Some(client) => client.test_connection().await,
            None => false,
        }
    }
}

pub type BuildFn = fn(PluginConfig, Logger) -> Result<Box<dyn Plugin>, PluginError>;

fn build(config: PluginConfig, logger: Logger) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(MovieDownloadPlugin::new(config, logger)))
}

/// Factory for [`MovieDownloadPlugin`].
pub fn movie_download_factory() -> FnPluginFactory<BuildFn> {
    factory_fn(MOVIE_DOWNLOAD_PLUGIN, build as BuildFn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::StructuredCommand;
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::{Json, Router};
    use chrono::Utc;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct MockRadarr {
        library: Arc<Mutex<Vec<Value>>>,
        added: Arc<Mutex<Vec<Value>>>,
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers.get("X-Api-Key").and_then(|v| v.to_str().ok()) == Some("secret")
    }

    async fn spawn_radarr(mock: MockRadarr) -> String {
        let app = Router::new()
            .route(
                "/api/v3/system/status",
                get(|headers: HeaderMap| async move {
                    if authorized(&headers) {
                        (StatusCode::OK, Json(json!({"version": "5.2.6"})))
                    } else {
                        (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"})))
                    }
                }),
            )
            .route(
                "/api/v3/movie/lookup",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let term = q.get("term").cloned().unwrap_or_default();
                    let results: Vec<Value> = match term.as_str() {
                        "Inception" => vec![json!({
                            "title": "Inception", "year": 2010, "tmdbId": 27205,
                            "titleSlug": "inception-27205", "images": []
                        })],
                        "Alien" => (0..7)
                            .map(|i| json!({"title": format!("Alien {}", i), "year": 1979 + i, "tmdbId": 348 + i}))
                            .collect(),
                        _ => vec![],
                    };
                    Json(Value::Array(results))
                }),
            )
            .route(
                "/api/v3/movie",
                get(|State(m): State<MockRadarr>| async move {
                    Json(Value::Array(m.library.lock().clone()))
                })
                .post(|State(m): State<MockRadarr>, Json(body): Json<Value>| async move {
                    m.added.lock().push(body.clone());
                    let mut stored = body;
                    stored["id"] = json!(1);
                    (StatusCode::CREATED, Json(stored))
                }),
            )
            .with_state(mock);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/v3", addr)
    }

    fn config(url: &str, api_key: &str) -> PluginConfig {
        let mut config = PluginConfig::new();
        config.insert("radarr_url".into(), json!(url));
        config.insert("radarr_api_key".into(), json!(api_key));
        config.insert("root_folder".into(), json!("/movies"));
        config
    }

    fn ctx(command: Value) -> CommandContext {
        CommandContext {
            sender: "me@home".into(),
            subject: "movie".into(),
            body: String::new(),
            command: StructuredCommand::new(command),
            timestamp: Utc::now(),
            config: PluginConfig::new(),
            logger: Logger::silent(),
        }
    }

    async fn ready_plugin(mock: MockRadarr) -> MovieDownloadPlugin {
        let url = spawn_radarr(mock).await;
        let mut plugin = MovieDownloadPlugin::new(config(&url, "secret"), Logger::silent());
        plugin.initialize().await.unwrap();
        plugin
    }

    #[tokio::test]
    async fn test_initialize_rejects_bad_api_key() {
        let url = spawn_radarr(MockRadarr::default()).await;
        let mut plugin = MovieDownloadPlugin::new(config(&url, "wrong"), Logger::silent());
        let err = plugin.initialize().await.unwrap_err();
        assert!(matches!(err, PluginError::ConnectionFailed(_)));
        assert!(!plugin.health_check().await);
    }

    #[tokio::test]
    async fn test_download_adds_first_match_with_payload() {
        let mock = MockRadarr::default();
        let plugin = ready_plugin(mock.clone()).await;

        let result = plugin
            .execute(&ctx(json!({"action": "download_movie", "title": "Inception"})))
            .await
            .unwrap();
        assert!(result.success, "{}", result.message);
        assert_eq!(result.data["tmdb_id"], json!(27205));

        let added = mock.added.lock();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0]["rootFolderPath"], json!("/movies"));
        assert_eq!(added[0]["qualityProfileId"], json!(1));
        assert_eq!(added[0]["monitored"], json!(true));
        assert_eq!(added[0]["addOptions"]["searchForMovie"], json!(true));
        assert_eq!(added[0]["titleSlug"], json!("inception-27205"));
    }

    #[tokio::test]
    async fn test_existing_movie_is_domain_failure() {
        let mock = MockRadarr::default();
        mock.library
            .lock()
            .push(json!({"title": "Inception", "year": 2010, "tmdbId": 27205, "id": 9}));
        let plugin = ready_plugin(mock.clone()).await;

        let result = plugin
            .execute(&ctx(json!({"action": "add_movie", "title": "Inception"})))
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.data_str("status"), Some("already_exists"));
        assert!(mock.added.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_title_and_unknown_movie() {
        let plugin = ready_plugin(MockRadarr::default()).await;

        let no_title = plugin
            .execute(&ctx(json!({"action": "download_movie"})))
            .await
            .unwrap();
        assert!(!no_title.success);

        let unknown = plugin
            .execute(&ctx(json!({"action": "download_movie", "title": "Nope"})))
            .await
            .unwrap();
        assert!(!unknown.success);
        assert_eq!(unknown.data["search_results"], json!(0));
    }

    #[tokio::test]
    async fn test_search_lists_top_five() {
        let plugin = ready_plugin(MockRadarr::default()).await;
        let result = plugin
            .execute(&ctx(json!({"action": "search_movie", "title": "Alien"})))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.data["total_results"], json!(7));
        assert_eq!(result.data["results"].as_array().unwrap().len(), 5);
        assert!(result.message.contains("1. Alien 0 (1979)"));
        assert!(result.message.contains("...and 2 more"));
    }

    #[tokio::test]
    async fn test_radarr_outage_is_domain_failure() {
        let mut plugin = ready_plugin(MockRadarr::default()).await;
        // Point the live client at a closed port.
        plugin.client = Some(
            RadarrClient::new(
                "http://127.0.0.1:9/api/v3",
                "secret",
                Duration::from_secs(2),
                Logger::silent(),
            )
            .unwrap(),
        );

        let result = plugin
            .execute(&ctx(json!({"action": "search_movie", "title": "Alien"})))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.data_str("error").is_some());
        assert!(!plugin.health_check().await);
    }

    #[tokio::test]
    async fn test_execute_before_initialize_is_fault() {
        let plugin = MovieDownloadPlugin::new(config("http://x", "k"), Logger::silent());
        let err = plugin
            .execute(&ctx(json!({"action": "search_movie", "title": "Alien"})))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::NotInitialized(_)));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = MovieSettings::from_config(&config("http://x", "k")).unwrap();
        assert_eq!(settings.quality_profile_id, 1);
        assert!(settings.auto_search);
        assert_eq!(settings.timeout_secs, 10);
    }
}
