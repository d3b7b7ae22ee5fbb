//! Minimal Radarr v3 API client.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::utilities::logger::Logger;

#[derive(Debug, Error)]
pub enum RadarrError {
    #[error("Cannot reach Radarr: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Radarr returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Radarr rejected the request: {0}")]
    Rejected(String),

    #[error("Movie data missing tmdbId")]
    MissingTmdbId,
}

/// A movie as returned by `/movie/lookup` and `/movie`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Movie {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<i64>,
    #[serde(default)]
    pub tmdb_id: Option<i64>,
    #[serde(default)]
    pub title_slug: Option<String>,
    #[serde(default)]
    pub images: Vec<Value>,
    /// Library id, only present for movies already in Radarr.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
}

impl Movie {
    /// `Title (year)`, or `Title (N/A)` when the year is unknown.
    pub fn display_name(&self) -> String {
        match self.year {
            Some(year) => format!("{} ({})", self.title, year),
            None => format!("{} (N/A)", self.title),
        }
    }
}

/// Options for adding a movie to the library.
#[derive(Debug, Clone)]
pub struct AddOptions<'a> {
    pub root_folder: &'a str,
    pub quality_profile_id: i64,
    pub search_now: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMoviePayload<'a> {
    title: &'a str,
    quality_profile_id: i64,
    tmdb_id: i64,
    title_slug: Option<&'a str>,
    images: &'a [Value],
    year: Option<i64>,
    root_folder_path: &'a str,
    monitored: bool,
    add_options: AddMovieFlags,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AddMovieFlags {
    search_for_movie: bool,
}

#[derive(Debug, Clone)]
pub struct RadarrClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
    logger: Logger,
}

impl RadarrClient {
    /// `base_url` is the API root, e.g. `http://localhost:7878/api/v3`.
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        logger: Logger,
    ) -> Result<Self, RadarrError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.trim_end_matches('/').to_string();
        logger.debug(format!("Radarr client initialized: {}", base_url));
        Ok(Self {
            base_url,
            api_key: api_key.to_string(),
            client,
            logger,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .header("X-Api-Key", &self.api_key)
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RadarrError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RadarrError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    /// `GET /system/status`. Returns the server version.
    pub async fn system_status(&self) -> Result<String, RadarrError> {
        let status: Value = Self::read_json(self.get("/system/status").send().await?).await?;
        let version = status
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        Ok(version)
    }

    /// Connection probe; logs the outcome.
    pub async fn test_connection(&self) -> bool {
        match self.system_status().await {
            Ok(version) => {
                self.logger
                    .info(format!("Radarr connection successful (version: {})", version));
                true
            }
            Err(e) => {
                self.logger.error(format!("Radarr connection failed: {}", e));
                false
            }
        }
    }

    /// Look a title up on TMDb through Radarr.
    pub async fn search_movie(&self, title: &str) -> Result<Vec<Movie>, RadarrError> {
        self.logger.info(format!("Searching for movie: {}", title));
        let response = self
            .get("/movie/lookup")
            .query(&[("term", title)])
            .send()
            .await?;
        let results: Vec<Movie> = Self::read_json(response).await?;

        self.logger
            .info(format!("Found {} result(s) for '{}'", results.len(), title));
        for (i, movie) in results.iter().take(3).enumerate() {
            self.logger.debug(format!(
                "  Result {}: {} - TMDb ID: {:?}",
                i + 1,
                movie.display_name(),
                movie.tmdb_id
            ));
        }
        Ok(results)
    }

    /// Every movie in the library.
    pub async fn movies(&self) -> Result<Vec<Movie>, RadarrError> {
        Self::read_json(self.get("/movie").send().await?).await
    }

    /// Library movie with the given TMDb id.
    pub async fn movie_by_tmdb_id(&self, tmdb_id: i64) -> Result<Option<Movie>, RadarrError> {
        Ok(self
            .movies()
            .await?
            .into_iter()
            .find(|m| m.tmdb_id == Some(tmdb_id)))
    }

    /// Add a lookup result to the library. Returns the stored movie.
    pub async fn add_movie(
        &self,
        movie: &Movie,
        options: &AddOptions<'_>,
    ) -> Result<Movie, RadarrError> {
        let tmdb_id = movie.tmdb_id.ok_or(RadarrError::MissingTmdbId)?;
        self.logger.info(format!(
            "Adding movie to Radarr: {} (TMDb ID: {})",
            movie.title, tmdb_id
        ));

        let payload = AddMoviePayload {
            title: &movie.title,
            quality_profile_id: options.quality_profile_id,
            tmdb_id,
            title_slug: movie.title_slug.as_deref(),
            images: &movie.images,
            year: movie.year,
            root_folder_path: options.root_folder,
            monitored: true,
            add_options: AddMovieFlags {
                search_for_movie: options.search_now,
            },
        };

        let response = self
            .client
            .post(format!("{}/movie", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("message")
                .and_then(Value::as_str)
                .or_else(|| body.get(0).and_then(|e| e.get("errorMessage")).and_then(Value::as_str))
                .unwrap_or("Unknown error")
                .to_string();
            self.logger.error(format!("Failed to add movie: {}", message));
            return Err(RadarrError::Rejected(message));
        }

        let added: Movie = Self::read_json(response).await?;
        self.logger.info(format!(
            "Movie added successfully: {} (ID: {:?})",
            movie.title, added.id
        ));
        Ok(added)
    }

    /// Configured quality profiles.
    pub async fn quality_profiles(&self) -> Result<Vec<Value>, RadarrError> {
        Self::read_json(self.get("/qualityprofile").send().await?).await
    }

    /// Configured root folders.
    pub async fn root_folders(&self) -> Result<Vec<Value>, RadarrError> {
        Self::read_json(self.get("/rootfolder").send().await?).await
    }
}
