//! SQLite command history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::Serialize;

use super::{AuditSink, CommandRecord};

/// Aggregate counts over the whole history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistorySummary {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
}

/// Command history stored in a SQLite file.
///
/// A connection is opened per call, so the store is cheap to share.
#[derive(Debug, Clone)]
pub struct SqliteAuditStore {
    db_path: PathBuf,
}

impl SqliteAuditStore {
    /// Open (creating when needed) the database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        store.initialize_db()?;
        log::info!("Command history database ready: {}", store.db_path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> anyhow::Result<Connection> {
        Connection::open(&self.db_path).map_err(|e| {
            log::error!(
                "Failed to open command history {}: {}",
                self.db_path.display(),
                e
            );
            e.into()
        })
    }

    fn initialize_db(&self) -> anyhow::Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS command_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                sender TEXT NOT NULL,
                subject TEXT,
                command_action TEXT NOT NULL,
                command_data TEXT NOT NULL,
                plugin_name TEXT NOT NULL,
                success BOOLEAN NOT NULL,
                result_message TEXT,
                result_data TEXT,
                execution_time_ms INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_cmd_history_timestamp
                ON command_history(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_cmd_history_sender
                ON command_history(sender);",
        )?;
        Ok(())
    }

    /// Insert a record, returning its row id.
    pub fn insert(&self, record: &CommandRecord) -> anyhow::Result<i64> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO command_history (
                timestamp, sender, subject, command_action, command_data,
                plugin_name, success, result_message, result_data, execution_time_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.timestamp.to_rfc3339(),
                record.sender,
                record.subject,
                record.action,
                serde_json::to_string(&record.command_data)?,
                record.module_name,
                record.success,
                record.message,
                serde_json::to_string(&record.result_data)?,
                record.execution_time_ms as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent records first.
    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<CommandRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, sender, subject, command_action, command_data,
                    plugin_name, success, result_message, result_data, execution_time_ms
             FROM command_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], read_row)?;
        let records = rows
            .map(|r| r.map_err(anyhow::Error::from).and_then(RawRow::into_record))
            .collect::<anyhow::Result<Vec<_>>>();
        records
    }

    /// Most recent records of one sender.
    pub fn by_sender(&self, sender: &str, limit: usize) -> anyhow::Result<Vec<CommandRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, sender, subject, command_action, command_data,
                    plugin_name, success, result_message, result_data, execution_time_ms
             FROM command_history WHERE sender = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sender, limit as i64], read_row)?;
        let records = rows
            .map(|r| r.map_err(anyhow::Error::from).and_then(RawRow::into_record))
            .collect::<anyhow::Result<Vec<_>>>();
        records
    }

    pub fn summary(&self) -> anyhow::Result<HistorySummary> {
        let conn = self.connect()?;
        let (total, succeeded): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success THEN 1 ELSE 0 END), 0)
             FROM command_history",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(HistorySummary {
            total: total as u64,
            succeeded: succeeded as u64,
            failed: (total - succeeded) as u64,
        })
    }
}

impl AuditSink for SqliteAuditStore {
    fn record(&self, record: &CommandRecord) -> anyhow::Result<()> {
        self.insert(record).map(|_| ())
    }
}

/// Row as stored; JSON and timestamp columns still in text form.
struct RawRow {
    timestamp: String,
    sender: String,
    subject: Option<String>,
    action: String,
    command_data: String,
    module_name: String,
    success: bool,
    message: Option<String>,
    result_data: Option<String>,
    execution_time_ms: Option<i64>,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        timestamp: row.get(0)?,
        sender: row.get(1)?,
        subject: row.get(2)?,
        action: row.get(3)?,
        command_data: row.get(4)?,
        module_name: row.get(5)?,
        success: row.get(6)?,
        message: row.get(7)?,
        result_data: row.get(8)?,
        execution_time_ms: row.get(9)?,
    })
}

impl RawRow {
    fn into_record(self) -> anyhow::Result<CommandRecord> {
        Ok(CommandRecord {
            timestamp: DateTime::parse_from_rfc3339(&self.timestamp)?.with_timezone(&Utc),
            sender: self.sender,
            subject: self.subject.unwrap_or_default(),
            action: self.action,
            command_data: serde_json::from_str(&self.command_data)?,
            module_name: self.module_name,
            success: self.success,
            message: self.message.unwrap_or_default(),
            result_data: match self.result_data {
                Some(text) => serde_json::from_str(&text)?,
                None => serde_json::Value::Null,
            },
            execution_time_ms: self.execution_time_ms.unwrap_or(0).max(0) as u64,
        })
    }
}
