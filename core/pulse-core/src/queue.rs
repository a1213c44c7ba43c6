//! Durable offline heartbeat queue.
//!
//! SQLite file shared by every pulse process. Each public operation opens its
//! own connection and runs in one IMMEDIATE transaction, so SQLite's file lock
//! serializes concurrent invocations. Records are keyed by `(entity, time)`;
//! re-enqueueing a pending heartbeat is a no-op.
//!
//! When the queue exceeds its capacity the oldest records are dropped, since
//! recent activity is worth more than stale activity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use pulse_protocol::{Heartbeat, IdentityKey};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, TransactionBehavior};

use crate::error::QueueError;

/// Well under the HTTP timeout so a stuck peer cannot stall an editor.
const BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// One pending heartbeat with its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRecord {
    pub heartbeat: Heartbeat,
    pub enqueued_at: DateTime<Utc>,
    /// Retryable delivery attempts that left this record in place.
    pub attempts: u32,
}

pub struct OfflineQueue {
    path: PathBuf,
    capacity: usize,
}

impl OfflineQueue {
    /// Opens (creating if needed) the queue at `path`. A file that SQLite
    /// rejects as not-a-database or corrupt is moved aside and replaced.
    pub fn open(path: PathBuf, capacity: usize) -> Result<Self, QueueError> {
        let queue = Self {
            path,
            capacity: capacity.max(1),
        };
        queue.init_schema()?;
        Ok(queue)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Inserts heartbeats not already queued, then trims to capacity.
    /// Returns how many were newly inserted.
    pub fn enqueue(&self, heartbeats: &[Heartbeat], now: DateTime<Utc>) -> Result<usize, QueueError> {
        if heartbeats.is_empty() {
            return Ok(0);
        }

        let enqueued_at = format_timestamp(now);
        let rows = heartbeats
            .iter()
            .map(|hb| serde_json::to_string(hb).map(|payload| (hb, payload)))
            .collect::<Result<Vec<_>, _>>()?;
        let capacity = i64::try_from(self.capacity).unwrap_or(i64::MAX);

        let (inserted, evicted) = self.with_transaction("enqueue", |conn| {
            let mut inserted = 0;
            {
                let mut stmt = conn
                    .prepare_cached(
                        "INSERT INTO heartbeats (entity, time, payload, enqueued_at, attempts) \
                         VALUES (?1, ?2, ?3, ?4, 0) \
                         ON CONFLICT(entity, time) DO NOTHING",
                    )
                    .map_err(sqlite_err("prepare insert"))?;
                for (hb, payload) in &rows {
                    inserted += stmt
                        .execute(params![hb.entity, hb.time, payload, enqueued_at])
                        .map_err(sqlite_err("insert heartbeat"))?;
                }
            }

            let evicted = conn
                .execute(
                    "DELETE FROM heartbeats WHERE seq IN ( \
                        SELECT seq FROM heartbeats \
                        ORDER BY enqueued_at DESC, seq DESC \
                        LIMIT -1 OFFSET ?1)",
                    params![capacity],
                )
                .map_err(sqlite_err("trim to capacity"))?;

            Ok((inserted, evicted))
        })?;

        if evicted > 0 {
            tracing::warn!(
                evicted,
                capacity = self.capacity,
                "Offline queue full; dropped oldest heartbeats"
            );
        }
        tracing::debug!(inserted, offered = heartbeats.len(), "Heartbeats queued");
        Ok(inserted)
    }

    /// Oldest records first, without removing them. Rows whose payload no
    /// longer parses are deleted and skipped.
    pub fn peek_batch(&self, limit: usize) -> Result<Vec<QueueRecord>, QueueError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let (records, torn) = self.with_transaction("peek", |conn| {
            let raw: Vec<(i64, RawRecord)> = {
                let mut stmt = conn
                    .prepare_cached(
                        "SELECT seq, entity, time, payload, enqueued_at, attempts FROM heartbeats \
                         ORDER BY enqueued_at ASC, seq ASC LIMIT ?1",
                    )
                    .map_err(sqlite_err("prepare peek"))?;
                let rows = stmt
                    .query_map(params![limit], |row| {
                        Ok((
                            row.get(0)?,
                            RawRecord {
                                entity: row.get(1)?,
                                time: row.get(2)?,
                                payload: row.get(3)?,
                                enqueued_at: row.get(4)?,
                                attempts: row.get(5)?,
                            },
                        ))
                    })
                    .map_err(sqlite_err("query pending"))?;
                let raw = rows
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(sqlite_err("read pending row"))?;
                raw
            };

            let mut records = Vec::with_capacity(raw.len());
            let mut torn = Vec::new();
            for (seq, row) in raw {
                match decode_record(row) {
                    Some(record) => records.push(record),
                    None => torn.push(seq),
                }
            }

            for seq in &torn {
                conn.execute("DELETE FROM heartbeats WHERE seq = ?1", params![seq])
                    .map_err(sqlite_err("delete torn row"))?;
            }

            Ok((records, torn.len()))
        })?;

        if torn > 0 {
            tracing::warn!(torn, "Dropped unreadable offline queue rows");
        }
        Ok(records)
    }

    /// Deletes exactly the given keys. Returns how many rows went away.
    pub fn commit_removal(&self, keys: &[IdentityKey]) -> Result<usize, QueueError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.for_each_key(
            "remove",
            "DELETE FROM heartbeats WHERE entity = ?1 AND time = ?2",
            keys,
        )
    }

    pub fn mark_attempted(&self, keys: &[IdentityKey]) -> Result<usize, QueueError> {
        if keys.is_empty() {
            return Ok(0);
        }
        self.for_each_key(
            "mark attempted",
            "UPDATE heartbeats SET attempts = attempts + 1 WHERE entity = ?1 AND time = ?2",
            keys,
        )
    }

    pub fn count(&self) -> Result<usize, QueueError> {
        self.with_transaction("count", |conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM heartbeats", [], |row| row.get(0))
                .map_err(sqlite_err("count"))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }

    fn for_each_key(
        &self,
        context: &'static str,
        sql: &str,
        keys: &[IdentityKey],
    ) -> Result<usize, QueueError> {
        self.with_transaction(context, |conn| {
            let mut stmt = conn.prepare_cached(sql).map_err(sqlite_err(context))?;
            let mut changed = 0;
            for key in keys {
                changed += stmt
                    .execute(params![key.entity, key.time])
                    .map_err(sqlite_err(context))?;
            }
            Ok(changed)
        })
    }

    fn init_schema(&self) -> Result<(), QueueError> {
        match self.create_tables() {
            Err(QueueError::Sqlite { context, source }) if is_corruption(&source) => {
                tracing::warn!(
                    path = %self.path.display(),
                    context = %context,
                    error = %source,
                    "Offline queue is corrupt; recreating"
                );
                self.quarantine()?;
                self.create_tables()
            }
            other => other,
        }
    }

    fn create_tables(&self) -> Result<(), QueueError> {
        let conn = self.connect()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS heartbeats (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                entity TEXT NOT NULL,
                time REAL NOT NULL,
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                UNIQUE(entity, time)
             );
             CREATE INDEX IF NOT EXISTS heartbeats_drain_order
                ON heartbeats (enqueued_at, seq);",
        )
        .map_err(sqlite_err("create schema"))
    }

    /// Moves the unreadable store aside so the next open starts empty.
    fn quarantine(&self) -> Result<(), QueueError> {
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "offline.db".to_string());
        let aside = self
            .path
            .with_file_name(format!("{file_name}.corrupt-{}", Utc::now().timestamp()));

        fs_err::rename(&self.path, &aside).map_err(|source| QueueError::Io {
            context: "quarantine corrupt queue".to_string(),
            source,
        })?;

        // Journal files belong to the old database.
        for suffix in ["-wal", "-shm"] {
            let sidecar = self.path.with_file_name(format!("{file_name}{suffix}"));
            if let Err(err) = std::fs::remove_file(&sidecar) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %sidecar.display(), error = %err, "Failed to remove journal");
                }
            }
        }

        tracing::info!(moved_to = %aside.display(), "Corrupt offline queue moved aside");
        Ok(())
    }

    fn with_transaction<T>(
        &self,
        context: &'static str,
        op: impl FnOnce(&Connection) -> Result<T, QueueError>,
    ) -> Result<T, QueueError> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sqlite_err(context))?;
        let value = op(&*tx)?;
        tx.commit().map_err(sqlite_err(context))?;
        Ok(value)
    }

    fn connect(&self) -> Result<Connection, QueueError> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent).map_err(|source| QueueError::Io {
                context: "create queue directory".to_string(),
                source,
            })?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn =
            Connection::open_with_flags(&self.path, flags).map_err(sqlite_err("open queue"))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(sqlite_err("set busy timeout"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sqlite_err("enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(sqlite_err("set synchronous"))?;

        Ok(conn)
    }
}

/// Columns of one `heartbeats` row as stored.
struct RawRecord {
    entity: String,
    time: f64,
    payload: String,
    enqueued_at: String,
    attempts: u32,
}

/// The `entity` and `time` columns are the identity the removal statements
/// match on, so they override whatever the payload parses to.
fn decode_record(row: RawRecord) -> Option<QueueRecord> {
    let mut heartbeat: Heartbeat = serde_json::from_str(&row.payload).ok()?;
    heartbeat.entity = row.entity;
    heartbeat.time = row.time;
    let enqueued_at = DateTime::parse_from_rfc3339(&row.enqueued_at)
        .ok()?
        .with_timezone(&Utc);
    Some(QueueRecord {
        heartbeat,
        enqueued_at,
        attempts: row.attempts,
    })
}

/// Fixed-width UTC so lexical order in SQLite matches time order.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn sqlite_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> QueueError {
    move |source| {
        if is_busy(&source) {
            QueueError::Busy(format!("{context}: {source}"))
        } else {
            QueueError::Sqlite {
                context: context.to_string(),
                source,
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn is_corruption(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(failure.code, ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt)
    )
}
