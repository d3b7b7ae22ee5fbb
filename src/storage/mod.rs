//! Audit trail of executed commands.
//!
//! The application loop writes one [`CommandRecord`] per outcome into an
//! [`AuditSink`]. The dispatcher itself never touches storage.

pub mod sqlite;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatcher::InboundMessage;
use crate::plugins::PluginResult;

pub use sqlite::{HistorySummary, SqliteAuditStore};

/// Placeholder for an action or plugin the outcome does not name.
pub const UNKNOWN: &str = "unknown";

/// One row of command history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub subject: String,
    pub action: String,
    pub command_data: Value,
    pub module_name: String,
    pub success: bool,
    pub message: String,
    pub result_data: Value,
    pub execution_time_ms: u64,
}

impl CommandRecord {
    /// Build the record for `outcome`.
    ///
    /// `message_duration_ms` is used when the outcome carries no per-command
    /// timing (batch-level failures).
    pub fn from_outcome(
        message: &InboundMessage,
        outcome: &PluginResult,
        message_duration_ms: u64,
    ) -> Self {
        let field = |key: &str| outcome.data_str(key).unwrap_or(UNKNOWN).to_string();
        let result_data = Value::Object(outcome.data.clone());
        let command_data = outcome
            .data
            .get("parsed_command")
            .cloned()
            .unwrap_or_else(|| result_data.clone());

        Self {
            timestamp: outcome.timestamp,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            action: field("action"),
            command_data,
            module_name: field("plugin_name"),
            success: outcome.success,
            message: outcome.message.clone(),
            execution_time_ms: outcome
                .data
                .get("execution_time_ms")
                .and_then(Value::as_u64)
                .unwrap_or(message_duration_ms),
            result_data,
        }
    }
}

/// Write-only destination for command records.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: &CommandRecord) -> anyhow::Result<()>;
}

/// Keeps records in memory. Used by tests and when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<CommandRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<CommandRecord> {
        self.records.lock().clone()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: &CommandRecord) -> anyhow::Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Write one record per outcome. Failures are logged, never returned.
pub fn record_outcomes(
    sink: &dyn AuditSink,
    message: &InboundMessage,
    outcomes: &[PluginResult],
    message_duration_ms: u64,
) {
    for outcome in outcomes {
        let record = CommandRecord::from_outcome(message, outcome, message_duration_ms);
        if let Err(e) = sink.record(&record) {
            log::error!(
                "Failed to record command '{}' from {}: {}",
                record.action,
                record.sender,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_from_routed_outcome() {
        let msg = InboundMessage::new("me@home", "movies", "get Heat");
        let outcome = PluginResult::success("added")
            .with("action", "download_movie")
            .with("plugin_name", "movie_download")
            .with("execution_time_ms", 42);

        let record = CommandRecord::from_outcome(&msg, &outcome, 900);
        assert_eq!(record.action, "download_movie");
        assert_eq!(record.module_name, "movie_download");
        assert_eq!(record.execution_time_ms, 42);
        assert_eq!(record.result_data["plugin_name"], json!("movie_download"));
    }

    #[test]
    fn test_record_defaults_for_batch_failure() {
        let msg = InboundMessage::new("me@home", "??", "gibberish");
        let outcome = PluginResult::failure("Could not understand").with("raw_output", "???");

        let record = CommandRecord::from_outcome(&msg, &outcome, 900);
        assert_eq!(record.action, UNKNOWN);
        assert_eq!(record.module_name, UNKNOWN);
        assert_eq!(record.execution_time_ms, 900);
        assert!(!record.success);
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn record(&self, _record: &CommandRecord) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_record_outcomes_writes_one_row_per_outcome() {
        let sink = MemoryAuditSink::new();
        let msg = InboundMessage::new("me@home", "x", "y");
        let outcomes = vec![PluginResult::success("a"), PluginResult::failure("b")];
        record_outcomes(&sink, &msg, &outcomes, 5);
        assert_eq!(sink.records().len(), 2);

        // Sink errors are swallowed.
        record_outcomes(&FailingSink, &msg, &outcomes, 5);
    }

    #[test]
    fn test_malformed_command_keeps_parsed_command() {
        let msg = InboundMessage::new("me@home", "x", "y");
        let outcome = PluginResult::failure("Malformed").with("parsed_command", json!({"city": "Rome"}));
        let record = CommandRecord::from_outcome(&msg, &outcome, 1);
        assert_eq!(record.command_data, json!({"city": "Rome"}));
    }
}
