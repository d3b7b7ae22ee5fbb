//! Dispatcher: turns one inbound message into an ordered list of outcomes.
//!
//! Pipeline: interpretation service → [`normalize`] → for each command, in
//! order: validate action, look up the plugin, health-check it, execute.
//! Every per-command failure is converted into a failing [`PluginResult`] so
//! one bad command never takes the rest of the batch down with it. Only an
//! interpretation failure or an empty batch ends a message early, and both
//! still produce exactly one outcome.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::llm::Interpreter;
use crate::normalizer::{normalize, StructuredCommand};
use crate::plugins::plugin::panic_message;
use crate::plugins::{CommandContext, PluginRegistry, PluginResult, PluginSummary};
use crate::utilities::logger::Logger;

/// `data` key every engine-generated failure carries.
pub const ERROR_KIND_FIELD: &str = "error_kind";

/// Machine-readable class of an engine-generated failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InterpretationFailed,
    NoCommand,
    MalformedCommand,
    UnknownCommand,
    PluginUnavailable,
    ExecutionFault,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterpretationFailed => "interpretation_failed",
            Self::NoCommand => "no_command",
            Self::MalformedCommand => "malformed_command",
            Self::UnknownCommand => "unknown_command",
            Self::PluginUnavailable => "plugin_unavailable",
            Self::ExecutionFault => "execution_fault",
        }
    }

    /// Kind recorded on an outcome, if the engine produced it.
    pub fn of(result: &PluginResult) -> Option<Self> {
        result
            .data
            .get(ERROR_KIND_FIELD)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn engine_failure(kind: ErrorKind, message: impl Into<String>) -> PluginResult {
    PluginResult::failure(message).with(ERROR_KIND_FIELD, kind.as_str())
}

/// A message handed over by a transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Transport-specific identifier (used to mark the message read).
    pub id: String,
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            subject: subject.into(),
            body: body.into(),
            received_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// Snapshot returned by [`Dispatcher::stats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatcherStats {
    pub total_plugins: usize,
    pub total_commands: usize,
    pub healthy_plugins: usize,
    pub interpreter_model: String,
    pub plugins: Vec<PluginSummary>,
}

pub struct Dispatcher {
    registry: PluginRegistry,
    interpreter: Box<dyn Interpreter>,
    logger: Logger,
}

impl Dispatcher {
    pub fn new(registry: PluginRegistry, interpreter: Box<dyn Interpreter>, logger: Logger) -> Self {
        Self {
            registry,
            interpreter,
            logger,
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Mutable registry access for (un)registration between messages.
    pub fn registry_mut(&mut self) -> &mut PluginRegistry {
        &mut self.registry
    }

    pub fn interpreter(&self) -> &dyn Interpreter {
        self.interpreter.as_ref()
    }

    /// Run one message through the pipeline. Never fails: every problem is
    /// reported as an outcome.
    pub async fn process_message(&self, message: &InboundMessage) -> Vec<PluginResult> {
        self.logger.info(format!(
            "Processing message from {}: {}",
            message.sender, message.subject
        ));

        let started = Instant::now();
        let interpreted = self.interpreter.interpret(&message.body).await;
        let parse_time_ms = elapsed_ms(started);
        self.logger
            .debug(format!("Interpretation took {}ms", parse_time_ms));

        let interpretation = match interpreted {
            Ok(interpretation) => interpretation,
            Err(e) => {
                self.logger
                    .warn(format!("Interpretation failed: {}", e.message));
                return vec![engine_failure(
                    ErrorKind::InterpretationFailed,
                    format!("Could not understand the request: {}", e.message),
                )
                .with("error", e.message)
                .with("raw_output", e.raw_output)
                .with("parse_time_ms", parse_time_ms)];
            }
        };

        let batch = match normalize(&interpretation.raw_output) {
            Ok(batch) => batch,
            Err(e) => {
                self.logger.warn(format!("Normalization failed: {}", e.reason));
                return vec![engine_failure(
                    ErrorKind::InterpretationFailed,
                    format!("Could not understand the request: {}", e.reason),
                )
                .with("error", e.reason)
                .with("raw_output", e.raw)
                .with("parse_time_ms", parse_time_ms)];
            }
        };

        self.logger.info(format!(
            "Interpreted {} command(s) ({} extraction)",
            batch.commands.len(),
            batch.strategy
        ));

        if batch.commands.is_empty() {
            return vec![engine_failure(
                ErrorKind::NoCommand,
                "No actionable command found in the message",
            )
            .with("raw_output", batch.raw)];
        }

        let total = batch.commands.len();
        let mut results = Vec::with_capacity(total);
        for (idx, command) in batch.commands.iter().enumerate() {
            self.logger.debug(format!(
                "Processing command {}/{}: {}",
                idx + 1,
                total,
                command.as_value()
            ));
            results.push(self.execute_command(message, command).await);
        }

        self.logger.info(format!(
            "Processed {} command(s), {} succeeded",
            results.len(),
            results.iter().filter(|r| r.success).count()
        ));
        results
    }

    async fn execute_command(
        &self,
        message: &InboundMessage,
        command: &StructuredCommand,
    ) -> PluginResult {
        let started = Instant::now();

        let Some(action) = command.action() else {
            self.logger.warn("Command missing 'action' field");
            return engine_failure(
                ErrorKind::MalformedCommand,
                "Malformed command: missing 'action' field",
            )
            .with("parsed_command", command.as_value().clone())
            .with("execution_time_ms", elapsed_ms(started));
        };

        let (mut result, plugin_name) = self.route(message, action, command).await;

        if let Some(name) = plugin_name {
            result.data.insert("plugin_name".into(), json!(name));
        }
        result.data.insert("action".into(), json!(action));
        result
            .data
            .insert("execution_time_ms".into(), json!(elapsed_ms(started)));
        result
    }

    /// Lookup, health check and execute. Returns the outcome and the name of
    /// the plugin involved, when one was found.
    async fn route(
        &self,
        message: &InboundMessage,
        action: &str,
        command: &StructuredCommand,
    ) -> (PluginResult, Option<String>) {
        let entry = match self.registry.plugin_for_command(action) {
            Ok(entry) => entry,
            Err(e) => {
                let available: Vec<String> = self.registry.list_commands().into_keys().collect();
                let result = engine_failure(
                    ErrorKind::UnknownCommand,
                    format!("Unsupported command: {}", action),
                )
                .with("available_commands", available)
                .with("error", e.to_string());
                return (result, None);
            }
        };
        let name = entry.name().to_string();

        match entry.probe_health().await {
            Ok(true) => {}
            Ok(false) => {
                self.logger
                    .error(format!("Plugin {} health check failed", name));
                let result = engine_failure(
                    ErrorKind::PluginUnavailable,
                    format!("Plugin {} is unavailable", name),
                );
                return (result, Some(name));
            }
            Err(detail) => {
                self.logger
                    .error(format!("Plugin {} health check panicked: {}", name, detail));
                let result = engine_failure(
                    ErrorKind::PluginUnavailable,
                    format!("Plugin {} is unavailable", name),
                )
                .with("error", format!("health check panicked: {}", detail));
                return (result, Some(name));
            }
        }

        let ctx = CommandContext {
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            command: command.clone(),
            timestamp: Utc::now(),
            config: entry.config().clone(),
            logger: self.logger.child(&name),
        };

        let started = Instant::now();
        let outcome = AssertUnwindSafe(entry.plugin().execute(&ctx))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) => {
                self.logger.info(format!(
                    "Plugin {} executed: {} ({}ms)",
                    name,
                    if result.success { "success" } else { "failed" },
                    elapsed_ms(started)
                ));
                result
            }
            Ok(Err(e)) => {
                self.logger
                    .error(format!("Plugin {} execution error: {}", name, e));
                execution_fault(e.to_string())
            }
            Err(panic) => {
                let detail = panic_message(panic.as_ref());
                self.logger
                    .error(format!("Plugin {} panicked: {}", name, detail));
                execution_fault(format!("plugin panicked: {}", detail))
            }
        };
        (result, Some(name))
    }

    /// Command name → description of the plugin that handles it.
    pub fn available_commands(&self) -> BTreeMap<String, String> {
        self.registry
            .list_commands()
            .into_iter()
            .filter_map(|(command, plugin)| {
                self.registry
                    .get(&plugin)
                    .map(|entry| (command, entry.metadata().description.clone()))
            })
            .collect()
    }

    pub async fn stats(&self) -> DispatcherStats {
        let plugins = self.registry.summaries().await;
        DispatcherStats {
            total_plugins: plugins.len(),
            total_commands: self.registry.command_count(),
            healthy_plugins: plugins.iter().filter(|p| p.healthy).count(),
            interpreter_model: self.interpreter.model_id().to_string(),
            plugins,
        }
    }

    /// Unload every plugin. Call between messages only.
    pub async fn shutdown(&mut self) {
        self.registry.cleanup_all().await;
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry)
            .field("model", &self.interpreter.model_id())
            .finish()
    }
}

fn execution_fault(detail: String) -> PluginResult {
    engine_failure(
        ErrorKind::ExecutionFault,
        format!("Error while executing command: {}", detail),
    )
    .with("error", detail)
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
