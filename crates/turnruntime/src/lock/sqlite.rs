use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use turncore::LockError;

use super::store::{LockRecord, LockStore};

/// Lock table persisted in SQLite.
///
/// Several processes may open the same file; the primary key on `key` makes
/// the insert the arbitration point between them.
pub struct SqliteLockStore {
    conn: Mutex<Connection>,
}

impl SqliteLockStore {
    /// Open or create the lock database.
    pub fn open(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    LockError::Store(format!("Failed to create lock directory: {}", e))
                })?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| LockError::Store(format!("Failed to open lock store: {}", e)))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LockError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LockError::Store(format!("Failed to open lock store: {}", e)))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LockError> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(|e| LockError::Store(format!("Failed to set busy timeout: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS turn_locks (
                 key TEXT PRIMARY KEY NOT NULL,
                 started_at TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );",
        )
        .map_err(|e| LockError::Store(format!("Failed to initialize lock schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, LockError> {
        self.conn.lock().map_err(|e| LockError::Store(e.to_string()))
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        // Unreadable timestamps count as ancient so the row gets reclaimed.
        .unwrap_or_default()
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockRecord> {
    let started: String = row.get(1)?;
    let created: String = row.get(2)?;
    Ok(LockRecord {
        key: row.get(0)?,
        started_at: parse_ts(&started),
        created_at: parse_ts(&created),
    })
}

/// Stored `(started_at, created_at)` text for `key`, unparsed.
fn read_raw(conn: &Connection, key: &str) -> Result<Option<(String, String)>, LockError> {
    conn.query_row(
        "SELECT started_at, created_at FROM turn_locks WHERE key = ?1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(|e| LockError::Store(format!("Failed to read lock: {}", e)))
}

impl LockStore for SqliteLockStore {
    fn get(&self, key: &str) -> Result<Option<LockRecord>, LockError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT key, started_at, created_at FROM turn_locks WHERE key = ?1",
            params![key],
            row_to_record,
        )
        .optional()
        .map_err(|e| LockError::Store(format!("Failed to read lock: {}", e)))
    }

    fn try_insert(&self, record: &LockRecord) -> Result<bool, LockError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO turn_locks (key, started_at, created_at) VALUES (?1, ?2, ?3)",
            params![
                record.key,
                format_ts(record.started_at),
                format_ts(record.created_at)
            ],
        );

        match inserted {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                Ok(false)
            }
            Err(e) => Err(LockError::Store(format!("Failed to insert lock: {}", e))),
        }
    }

    fn evict(&self, key: &str, started_at: DateTime<Utc>) -> Result<bool, LockError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LockError::Store(format!("Failed to begin eviction: {}", e)))?;

        // Rows written by other tools may use another timestamp layout, so
        // match on the parsed value and delete by the stored text.
        let Some((started_raw, _)) = read_raw(&tx, key)? else {
            return Ok(false);
        };
        if parse_ts(&started_raw) != started_at {
            return Ok(false);
        }

        let deleted = tx
            .execute(
                "DELETE FROM turn_locks WHERE key = ?1 AND started_at = ?2",
                params![key, started_raw],
            )
            .map_err(|e| LockError::Store(format!("Failed to evict lock: {}", e)))?;
        tx.commit()
            .map_err(|e| LockError::Store(format!("Failed to evict lock: {}", e)))?;
        Ok(deleted > 0)
    }

    fn release(&self, key: &str) -> Result<bool, LockError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM turn_locks WHERE key = ?1", params![key])
            .map_err(|e| LockError::Store(format!("Failed to release lock: {}", e)))?;
        Ok(deleted > 0)
    }

    fn renew(
        &self,
        key: &str,
        created_at: DateTime<Utc>,
        started_at: DateTime<Utc>,
    ) -> Result<bool, LockError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| LockError::Store(format!("Failed to begin renewal: {}", e)))?;

        let Some((_, created_raw)) = read_raw(&tx, key)? else {
            return Ok(false);
        };
        if parse_ts(&created_raw) != created_at {
            return Ok(false);
        }

        let updated = tx
            .execute(
                "UPDATE turn_locks SET started_at = ?2 WHERE key = ?1 AND created_at = ?3",
                params![key, format_ts(started_at), created_raw],
            )
            .map_err(|e| LockError::Store(format!("Failed to renew lock: {}", e)))?;
        tx.commit()
            .map_err(|e| LockError::Store(format!("Failed to renew lock: {}", e)))?;
        Ok(updated > 0)
    }

    fn list(&self) -> Result<Vec<LockRecord>, LockError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT key, started_at, created_at FROM turn_locks ORDER BY key")
            .map_err(|e| LockError::Store(format!("Failed to prepare query: {}", e)))?;
        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| LockError::Store(format!("Failed to list locks: {}", e)))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| LockError::Store(format!("Failed to list locks: {}", e)))
    }
}
