//! Ollama chat client.
//!
//! Talks to a local (or remote) Ollama server through its HTTP API:
//! `POST /api/chat` for interpretation and `GET /api/tags` as a liveness probe.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{InterpretError, Interpretation, Interpreter, DEFAULT_SYSTEM_PROMPT};
use crate::config::LlmSettings;

/// Interpreter backed by an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaInterpreter {
    host: String,
    model: String,
    system_prompt: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: String,
}

impl OllamaInterpreter {
    /// Build a client from the `llm` configuration section.
    pub fn from_settings(settings: &LlmSettings) -> Result<Self, InterpretError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| InterpretError::new(format!("Failed to build HTTP client: {}", e)))?;

        let system_prompt = settings
            .system_prompt
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        log::info!(
            "Ollama interpreter initialized: model={}, host={}",
            settings.model,
            settings.host
        );

        Ok(Self {
            host: settings.host.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            system_prompt,
            client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Switch to another model.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        log::info!("Switching Ollama model from {} to {}", self.model, model);
        self.model = model;
    }

    /// Names of the models the server has pulled.
    pub async fn list_models(&self) -> Result<Vec<String>, InterpretError> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.host))
            .send()
            .await
            .map_err(|e| InterpretError::new(format!("Failed to list Ollama models: {}", e)))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| InterpretError::new(format!("Invalid /api/tags response: {}", e)))?;

        Ok(body
            .get("models")
            .and_then(Value::as_array)
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m.get("name").and_then(Value::as_str))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl Interpreter for OllamaInterpreter {
    async fn interpret(&self, text: &str) -> Result<Interpretation, InterpretError> {
        log::debug!("Calling Ollama model: {}", self.model);

        let request = ChatRequest {
            model: &self.model,
            stream: false,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &self.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.host))
            .json(&request)
            .send()
            .await
            .map_err(|e| InterpretError::new(format!("LLM call failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| InterpretError::new(format!("Failed to read LLM response: {}", e)))?;

        if !status.is_success() {
            return Err(InterpretError::new(format!(
                "LLM call failed: HTTP {}",
                status.as_u16()
            ))
            .with_raw(body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            InterpretError::new(format!("Unexpected Ollama response: {}", e)).with_raw(body.clone())
        })?;

        if let Some(error) = parsed.error {
            return Err(InterpretError::new(format!("Ollama error: {}", error)).with_raw(body));
        }

        let content = parsed.message.map(|m| m.content).unwrap_or_default();
        log::debug!("LLM raw output: {}", content);

        Ok(Interpretation {
            raw_output: content,
            model: self.model.clone(),
        })
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(_) => {
                log::debug!("Ollama connection test successful");
                true
            }
            Err(e) => {
                log::error!("Ollama connection test failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, routing::post, Json, Router};
    use serde_json::json;

    async fn spawn_server(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn settings(host: String) -> LlmSettings {
        LlmSettings {
            host,
            model: "qwen3:8b".to_string(),
            system_prompt: None,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_interpret_returns_raw_content() {
        let app = Router::new().route(
            "/api/chat",
            post(|Json(req): Json<Value>| async move {
                assert_eq!(req["stream"], json!(false));
                assert_eq!(req["messages"][0]["role"], json!("system"));
                assert_eq!(req["messages"][1]["content"], json!("get me Alien"));
                Json(json!({
                    "model": req["model"],
                    "message": {"role": "assistant", "content": "```json\n[{\"action\":\"download_movie\"}]\n```"},
                    "done": true
                }))
            }),
        );
        let host = spawn_server(app).await;

        let interpreter = OllamaInterpreter::from_settings(&settings(host)).unwrap();
        let out = interpreter.interpret("get me Alien").await.unwrap();
        assert_eq!(out.model, "qwen3:8b");
        assert!(out.raw_output.contains("download_movie"));
    }

    #[tokio::test]
    async fn test_interpret_surfaces_server_error() {
        let app = Router::new().route(
            "/api/chat",
            post(|| async { Json(json!({"error": "model 'qwen3:8b' not found"})) }),
        );
        let host = spawn_server(app).await;

        let interpreter = OllamaInterpreter::from_settings(&settings(host)).unwrap();
        let err = interpreter.interpret("hello").await.unwrap_err();
        assert!(err.message.contains("not found"));
        assert!(err.raw_output.contains("error"));
    }

    #[tokio::test]
    async fn test_connection_and_model_listing() {
        let app = Router::new().route(
            "/api/tags",
            get(|| async { Json(json!({"models": [{"name": "qwen3:8b"}, {"name": "llama3"}]})) }),
        );
        let host = spawn_server(app).await;

        let interpreter = OllamaInterpreter::from_settings(&settings(host)).unwrap();
        assert!(interpreter.test_connection().await);
        assert_eq!(
            interpreter.list_models().await.unwrap(),
            vec!["qwen3:8b".to_string(), "llama3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_cleanly() {
        let interpreter =
            OllamaInterpreter::from_settings(&settings("http://127.0.0.1:9".to_string())).unwrap();
        assert!(!interpreter.test_connection().await);
        assert!(interpreter.interpret("hi").await.is_err());
    }
}
