//! Logging service - structured event logging to DuckDB
//!
//! Records what the rule engine did (rules created, bulk applications,
//! failed writes) in logs.duckdb. Only ids, counts and error messages are
//! stored: never merchants, descriptions, amounts or rule bodies.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::log_migrations::LOG_MIGRATIONS;
use crate::services::MigrationService;

/// Who is driving the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryPoint {
    Cli,
    /// Embedded as a library (services called directly)
    Library,
}

impl EntryPoint {
    fn as_str(&self) -> &'static str {
        match self {
            EntryPoint::Cli => "cli",
            EntryPoint::Library => "library",
        }
    }
}

/// Event names written by the services
pub mod events {
    pub const RULE_CREATED: &str = "rule_created";
    pub const RULE_UPDATED: &str = "rule_updated";
    pub const RULE_DELETED: &str = "rule_deleted";
    pub const RULES_APPLIED: &str = "rules_applied";
    pub const RULE_GROUP_UPDATE_FAILED: &str = "rule_group_update_failed";
    pub const COMMAND_EXECUTED: &str = "command_executed";
}

/// A log event to be recorded
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogEvent {
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affected_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LogEvent {
    pub fn new(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            ..Default::default()
        }
    }

    /// CLI command that produced the event
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_rule(mut self, rule_id: Uuid) -> Self {
        self.rule_id = Some(rule_id.to_string());
        self
    }

    /// Transactions (or rows) affected
    pub fn with_count(mut self, count: usize) -> Self {
        self.affected_count = Some(count as i64);
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// A log entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub entry_point: String,
    pub app_version: String,
    pub platform: String,
    pub event: String,
    pub command: Option<String>,
    pub rule_id: Option<String>,
    pub affected_count: Option<i64>,
    pub error_message: Option<String>,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Which entries to return, newest first
#[derive(Debug, Clone)]
pub struct LogFilter {
    /// Exact event name, e.g. `rule_group_update_failed`
    pub event: Option<String>,
    pub rule_id: Option<Uuid>,
    pub errors_only: bool,
    pub limit: usize,
}

impl Default for LogFilter {
    fn default() -> Self {
        Self {
            event: None,
            rule_id: None,
            errors_only: false,
            limit: 50,
        }
    }
}

/// Entry totals for one event name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventCount {
    pub event: String,
    pub entries: u64,
    pub errors: u64,
    /// Sum of `affected_count` over the entries
    pub affected: i64,
}

/// Summary of the log database
#[derive(Debug, Clone, Serialize)]
pub struct LogStats {
    pub total_entries: u64,
    pub error_entries: u64,
    /// Most frequent first
    pub events: Vec<EventCount>,
    pub database_path: PathBuf,
}

impl LogStats {
    /// Totals for one event name (zero when it never occurred)
    pub fn event(&self, name: &str) -> EventCount {
        self.events
            .iter()
            .find(|e| e.event == name)
            .cloned()
            .unwrap_or_else(|| EventCount {
                event: name.to_string(),
                entries: 0,
                errors: 0,
                affected: 0,
            })
    }
}

const SELECT_COLUMNS: &str = "id, timestamp, entry_point, app_version, platform, \
     event, command, rule_id, affected_count, error_message";

fn row_to_entry(row: &duckdb::Row) -> duckdb::Result<LogEntry> {
    Ok(LogEntry {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        entry_point: row.get(2)?,
        app_version: row.get(3)?,
        platform: row.get(4)?,
        event: row.get(5)?,
        command: row.get(6)?,
        rule_id: row.get(7)?,
        affected_count: row.get(8)?,
        error_message: row.get(9)?,
    })
}

/// Service for structured event logging
pub struct LoggingService {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    entry_point: EntryPoint,
    app_version: String,
}

impl LoggingService {
    /// Open or create logs.duckdb in the tidyline directory and bring its
    /// schema up to date
    pub fn new(
        tidyline_dir: &Path,
        entry_point: EntryPoint,
        app_version: impl Into<String>,
    ) -> Result<Self> {
        let db_path = tidyline_dir.join("logs.duckdb");
        let conn = Connection::open(&db_path)?;
        MigrationService::with_migrations(&conn, LOG_MIGRATIONS).run_pending()?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            entry_point,
            app_version: app_version.into(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow!("Lock poisoned: {}", e))
    }

    /// Record an event, stamped with this service's entry point and version
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sys_logs (timestamp, entry_point, app_version, platform,
                                   event, command, rule_id, affected_count, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            duckdb::params![
                Utc::now().timestamp_millis(),
                self.entry_point.as_str(),
                &self.app_version,
                std::env::consts::OS,
                &event.event,
                &event.command,
                &event.rule_id,
                &event.affected_count,
                &event.error_message,
            ],
        )?;
        Ok(())
    }

    /// Entries matching `filter`, newest first
    pub fn query(&self, filter: &LogFilter) -> Result<Vec<LogEntry>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn duckdb::ToSql>> = Vec::new();
        if let Some(event) = &filter.event {
            clauses.push("event = ?");
            values.push(Box::new(event.clone()));
        }
        if let Some(rule_id) = filter.rule_id {
            clauses.push("rule_id = ?");
            values.push(Box::new(rule_id.to_string()));
        }
        if filter.errors_only {
            clauses.push("error_message IS NOT NULL");
        }
        values.push(Box::new(filter.limit as i64));

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM sys_logs {} ORDER BY timestamp DESC, id DESC LIMIT ?",
            SELECT_COLUMNS, where_clause
        );

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn duckdb::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let entries = stmt
            .query_map(refs.as_slice(), row_to_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Totals overall and per event
    pub fn stats(&self) -> Result<LogStats> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT event, COUNT(*), COUNT(error_message),
                    CAST(COALESCE(SUM(affected_count), 0) AS BIGINT)
             FROM sys_logs GROUP BY event ORDER BY COUNT(*) DESC, event",
        )?;
        let events = stmt
            .query_map([], |row| {
                Ok(EventCount {
                    event: row.get(0)?,
                    entries: row.get(1)?,
                    errors: row.get(2)?,
                    affected: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LogStats {
            total_entries: events.iter().map(|e| e.entries).sum(),
            error_entries: events.iter().map(|e| e.errors).sum(),
            events,
            database_path: self.db_path.clone(),
        })
    }

    /// Delete entries recorded before `cutoff`; returns how many went
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM sys_logs WHERE timestamp < ?",
            [cutoff.timestamp_millis()],
        )?;
        Ok(deleted)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}
