//! Axum route handlers for the HTTP channel.
//!
//! # Routes
//!
//! - `GET  /health`  : Returns `{"status": "ok", "version": ..., "service": "homemaid"}`
//! - `GET  /commands`: Available commands
//! - `GET  /stats`   : `DispatcherStats`
//! - `POST /messages`: Accepts `{sender, subject, body}`, returns outcomes

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::dispatcher::{Dispatcher, InboundMessage};
use crate::plugins::PluginResult;
use crate::storage::{record_outcomes, AuditSink};

/// Shared application state for the HTTP server.
///
/// The dispatcher sits behind an async mutex, so messages are processed one
/// at a time no matter how many requests arrive.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Mutex<Dispatcher>>,
    pub audit: Option<Arc<dyn AuditSink>>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Mutex<Dispatcher>>) -> Self {
        Self {
            dispatcher,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    pub body: String,
}

/// Response of `POST /messages`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message_id: String,
    pub all_succeeded: bool,
    pub results: Vec<PluginResult>,
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/commands", get(commands_handler))
        .route("/stats", get(stats_handler))
        .route("/messages", post(message_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health: liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": crate::VERSION,
        "service": "homemaid",
    }))
}

async fn commands_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = state.dispatcher.lock().await;
    Json(dispatcher.available_commands())
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = state.dispatcher.lock().await;
    Json(dispatcher.stats().await)
}

/// POST /messages: run one message through the dispatcher.
async fn message_handler(
    State(state): State<AppState>,
    Json(request): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, (StatusCode, Json<Value>)> {
    if request.sender.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "'sender' must not be empty"})),
        ));
    }

    let message = InboundMessage::new(request.sender, request.subject, request.body);
    tracing::info!(sender = %message.sender, id = %message.id, "Message received over HTTP");

    let started = Instant::now();
    let results = {
        let dispatcher = state.dispatcher.lock().await;
        dispatcher.process_message(&message).await
    };
    let duration_ms = started.elapsed().as_millis() as u64;

    if let Some(audit) = &state.audit {
        record_outcomes(audit.as_ref(), &message, &results, duration_ms);
    }

    Ok(Json(MessageResponse {
        message_id: message.id,
        all_succeeded: results.iter().all(|r| r.success),
        results,
    }))
}
