use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use super::{LogCategory, LogEntry, LogError, LogLevel, LogSink};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS log_entries (
        row_id INTEGER PRIMARY KEY AUTOINCREMENT,
        entry_id INTEGER NOT NULL,
        session_id TEXT NOT NULL,
        timestamp TEXT NOT NULL,
        category TEXT NOT NULL,
        level TEXT NOT NULL,
        message TEXT NOT NULL,
        data TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries(timestamp);
    CREATE INDEX IF NOT EXISTS idx_log_entries_category ON log_entries(category);
    CREATE INDEX IF NOT EXISTS idx_log_entries_level ON log_entries(level);
"#;

/// Raw row as read back from SQLite, before parsing.
type RawRow = (i64, String, String, String, String, String, String);

/// SQLite-backed log sink
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    /// Open (or create) the database file and the log table
    pub fn new(path: &Path) -> Result<Self, LogError> {
        let conn = Connection::open(path).map_err(|e| LogError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    /// Create an in-memory sink (useful for testing)
    pub fn in_memory() -> Result<Self, LogError> {
        let conn = Connection::open_in_memory().map_err(|e| LogError::Database(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, LogError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| LogError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Number of persisted entries.
    pub fn count(&self) -> Result<usize, LogError> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get(0))
            .map_err(|e| LogError::Database(e.to_string()))?;
        Ok(count as usize)
    }

    /// The newest `limit` persisted entries, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<LogEntry>, LogError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT entry_id, session_id, timestamp, category, level, message, data \
                 FROM log_entries ORDER BY row_id DESC LIMIT ?",
            )
            .map_err(|e| LogError::Database(e.to_string()))?;

        let rows: Vec<RawRow> = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .map_err(|e| LogError::Database(e.to_string()))?
            .collect::<Result<_, _>>()
            .map_err(|e| LogError::Database(e.to_string()))?;

        let mut entries = rows
            .into_iter()
            .map(Self::parse_row)
            .collect::<Result<Vec<_>, _>>()?;
        entries.reverse();
        Ok(entries)
    }

    fn parse_row(row: RawRow) -> Result<LogEntry, LogError> {
        let (id, session_id, timestamp, category, level, message, data) = row;

        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| LogError::Serialization(e.to_string()))?
            .with_timezone(&Utc);
        let category = LogCategory::parse(&category)
            .ok_or_else(|| LogError::Serialization(format!("unknown category: {}", category)))?;
        let level = LogLevel::parse(&level)
            .ok_or_else(|| LogError::Serialization(format!("unknown level: {}", level)))?;
        let data =
            serde_json::from_str(&data).map_err(|e| LogError::Serialization(e.to_string()))?;

        Ok(LogEntry {
            id: id as u64,
            session_id,
            timestamp,
            category,
            level,
            message,
            data,
        })
    }
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl LogSink for SqliteLogSink {
    fn persist(&self, entries: &[LogEntry]) -> Result<(), LogError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn
            .transaction()
            .map_err(|e| LogError::Database(e.to_string()))?;

        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO log_entries (entry_id, session_id, timestamp, category, level, message, data) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| LogError::Database(e.to_string()))?;

            for entry in entries {
                let data_json = serde_json::to_string(&entry.data)
                    .map_err(|e| LogError::Serialization(e.to_string()))?;
                stmt.execute(params![
                    entry.id as i64,
                    entry.session_id,
                    format_timestamp(&entry.timestamp),
                    entry.category.as_str(),
                    entry.level.as_str(),
                    entry.message,
                    data_json,
                ])
                .map_err(|e| LogError::Database(e.to_string()))?;
            }
        }

        tx.commit().map_err(|e| LogError::Database(e.to_string()))
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, LogError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM log_entries WHERE timestamp < ?",
            params![format_timestamp(&cutoff)],
        )
        .map_err(|e| LogError::Database(e.to_string()))
    }
}
