//! SQLite implementation of [`OperationStore`].
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table. When the schema changes,
//! increment `CURRENT_SCHEMA_VERSION` and add a step to `run_migrations()`.
//!
//! Timestamps are stored as epoch milliseconds; payloads and results as JSON
//! text.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::store::{ForkRecord, NewFork, NewPr, OperationStore, PrRecord, QueueCounts, StoreError};
use crate::types::{
    Lease, LeaseOwner, Operation, OperationId, OperationPayload, OperationStatus, OperationType,
    RepoId, UnknownVariant,
};

const CURRENT_SCHEMA_VERSION: i64 = 1;

const OPERATION_COLUMNS: &str = "id, operation_type, payload, status, result, error, created_at, \
     processing_started_at, lease_owner, lease_expires_at, finished_at";

const FORK_COLUMNS: &str =
    "id, upstream_owner, upstream_repo, fork_owner, fork_repo, fork_url, created_at";

const PR_COLUMNS: &str =
    "id, source_pr_url, fork_id, pr_url, title, head_branch, status, updated_at";

/// SQLite-backed operation store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite calls
/// without blocking the async runtime.
pub struct SqliteOperationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteOperationStore {
    /// Opens (creating if needed) the database at `path`.
    ///
    /// The database is configured with `journal_mode = WAL` and a
    /// `busy_timeout` so that several processes can share the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref).map_err(sql("open database"))?;

        // SQLite silently keeps the rollback journal on filesystems without
        // shared memory support; in-memory databases report "memory".
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(sql("set journal_mode"))?;
        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!("SQLite returned '{journal_mode}' instead of 'wal'"),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(sql("configure database"))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql("get schema version"))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "database schema version {from_version} is newer than supported version \
                     {CURRENT_SCHEMA_VERSION}"
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS operations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation_type TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    status TEXT NOT NULL,
                    result TEXT,
                    error TEXT,
                    created_at INTEGER NOT NULL,
                    processing_started_at INTEGER,
                    lease_owner TEXT,
                    lease_expires_at INTEGER,
                    finished_at INTEGER
                );
                CREATE INDEX IF NOT EXISTS idx_operations_status
                    ON operations(status, id);

                CREATE TABLE IF NOT EXISTS forks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    upstream_owner TEXT,
                    upstream_repo TEXT,
                    fork_owner TEXT NOT NULL,
                    fork_repo TEXT NOT NULL,
                    fork_url TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    UNIQUE (fork_owner, fork_repo)
                );

                CREATE TABLE IF NOT EXISTS pull_requests (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    source_pr_url TEXT,
                    fork_id INTEGER,
                    pr_url TEXT,
                    title TEXT,
                    head_branch TEXT,
                    status TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
            )
            .map_err(sql("migration v1"))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(sql("update schema version"))?;

        debug!(
            from = from_version,
            to = CURRENT_SCHEMA_VERSION,
            "Migrated operation database"
        );
        Ok(())
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::storage(operation, "connection mutex poisoned"))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
    }
}

fn sql(operation: &'static str) -> impl Fn(rusqlite::Error) -> StoreError {
    move |e| StoreError::storage(operation, e.to_string())
}

fn timestamp(what: &'static str, id: i64, millis: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| StoreError::corrupt(what, id, format!("timestamp {millis} out of range")))
}

fn optional_timestamp(
    what: &'static str,
    id: i64,
    millis: Option<i64>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    millis.map(|m| timestamp(what, id, m)).transpose()
}

// ─── Operations ───

struct OperationRow {
    id: i64,
    operation_type: String,
    payload: String,
    status: String,
    result: Option<String>,
    error: Option<String>,
    created_at: i64,
    processing_started_at: Option<i64>,
    lease_owner: Option<String>,
    lease_expires_at: Option<i64>,
    finished_at: Option<i64>,
}

impl OperationRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(OperationRow {
            id: row.get(0)?,
            operation_type: row.get(1)?,
            payload: row.get(2)?,
            status: row.get(3)?,
            result: row.get(4)?,
            error: row.get(5)?,
            created_at: row.get(6)?,
            processing_started_at: row.get(7)?,
            lease_owner: row.get(8)?,
            lease_expires_at: row.get(9)?,
            finished_at: row.get(10)?,
        })
    }

    fn into_operation(self) -> Result<Operation, StoreError> {
        let id = self.id;
        let operation_type: OperationType = self
            .operation_type
            .parse()
            .map_err(|e: UnknownVariant| {
                StoreError::corrupt("operation type", id, e.to_string())
            })?;
        let payload = OperationPayload::from_parts(operation_type, &self.payload)
            .map_err(|e| StoreError::corrupt("payload", id, e.to_string()))?;
        let status: OperationStatus = self
            .status
            .parse()
            .map_err(|e: UnknownVariant| {
                StoreError::corrupt("status", id, e.to_string())
            })?;
        let result = self
            .result
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| StoreError::corrupt("result", id, e.to_string()))?;
        let lease = match (self.lease_owner, self.lease_expires_at) {
            (Some(owner), Some(expires_at)) => Some(Lease {
                owner: LeaseOwner::new(owner),
                expires_at: timestamp("lease expiry", id, expires_at)?,
            }),
            _ => None,
        };

        Ok(Operation {
            id: OperationId(id),
            payload,
            status,
            result,
            error: self.error,
            created_at: timestamp("created_at", id, self.created_at)?,
            processing_started_at: optional_timestamp(
                "processing_started_at",
                id,
                self.processing_started_at,
            )?,
            lease,
            finished_at: optional_timestamp("finished_at", id, self.finished_at)?,
        })
    }
}

fn query_operation(
    conn: &Connection,
    operation: &'static str,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Operation>, StoreError> {
    conn.query_row(
        &format!("SELECT {OPERATION_COLUMNS} FROM operations {filter}"),
        params,
        OperationRow::read,
    )
    .optional()
    .map_err(sql(operation))?
    .map(OperationRow::into_operation)
    .transpose()
}

// ─── Forks and pull requests ───

type ForkRow = (
    i64,
    Option<String>,
    Option<String>,
    String,
    String,
    String,
    i64,
);

fn read_fork(row: &Row<'_>) -> rusqlite::Result<ForkRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn query_fork(
    conn: &Connection,
    operation: &'static str,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<ForkRecord>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {FORK_COLUMNS} FROM forks {filter}"),
            params,
            read_fork,
        )
        .optional()
        .map_err(sql(operation))?;

    let Some((id, upstream_owner, upstream_repo, fork_owner, fork_repo, fork_url, created_at)) =
        row
    else {
        return Ok(None);
    };

    let upstream = match (upstream_owner, upstream_repo) {
        (Some(owner), Some(repo)) => Some(RepoId::new(owner, repo)),
        _ => None,
    };
    Ok(Some(ForkRecord {
        id,
        upstream,
        fork: RepoId::new(fork_owner, fork_repo),
        fork_url,
        created_at: timestamp("fork created_at", id, created_at)?,
    }))
}

fn query_pr(
    conn: &Connection,
    operation: &'static str,
    id: i64,
) -> Result<Option<PrRecord>, StoreError> {
    let row = conn
        .query_row(
            &format!("SELECT {PR_COLUMNS} FROM pull_requests WHERE id = ?1"),
            params![id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, i64>(7)?,
                ))
            },
        )
        .optional()
        .map_err(sql(operation))?;

    row.map(
        |(id, source_pr_url, fork_id, pr_url, title, head_branch, status, updated_at)| {
            Ok(PrRecord {
                id,
                source_pr_url,
                fork_id,
                pr_url,
                title,
                head_branch,
                status,
                updated_at: timestamp("pull request updated_at", id, updated_at)?,
            })
        },
    )
    .transpose()
}

fn row_exists(conn: &Connection, table: &str, id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        &format!("SELECT 1 FROM {table} WHERE id = ?1"),
        params![id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

impl OperationStore for SqliteOperationStore {
    async fn enqueue(
        &self,
        payload: OperationPayload,
        now: DateTime<Utc>,
    ) -> Result<OperationId, StoreError> {
        let operation_type = payload.operation_type();
        let payload_json = payload.to_payload_json()?;

        self.blocking("enqueue", move |conn| {
            conn.execute(
                "INSERT INTO operations (operation_type, payload, status, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    operation_type.as_str(),
                    payload_json,
                    OperationStatus::Queued.as_str(),
                    now.timestamp_millis()
                ],
            )
            .map_err(sql("enqueue"))?;
            Ok(OperationId(conn.last_insert_rowid()))
        })
        .await
    }

    async fn get(&self, id: OperationId) -> Result<Option<Operation>, StoreError> {
        self.blocking("get", move |conn| {
            query_operation(conn, "get", "WHERE id = ?1", params![id.0])
        })
        .await
    }

    async fn next_queued(&self) -> Result<Option<Operation>, StoreError> {
        self.blocking("next_queued", |conn| {
            query_operation(
                conn,
                "next_queued",
                "WHERE status = 'queued' ORDER BY id ASC LIMIT 1",
                [],
            )
        })
        .await
    }

    async fn try_lease(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.blocking("try_lease", move |conn| {
            let updated = conn
                .execute(
                    "UPDATE operations
                     SET status = 'processing', processing_started_at = ?2,
                         lease_owner = ?3, lease_expires_at = ?4
                     WHERE id = ?1 AND status = 'queued'
                       AND NOT EXISTS (
                           SELECT 1 FROM operations WHERE status = 'processing'
                       )",
                    params![
                        id.0,
                        now.timestamp_millis(),
                        owner.as_str(),
                        expires_at.timestamp_millis()
                    ],
                )
                .map_err(sql("try_lease"))?;
            Ok(updated == 1)
        })
        .await
    }

    async fn mark_completed(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        result: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result_json = serde_json::to_string(&result)?;
        self.blocking("mark_completed", move |conn| {
            let updated = conn
                .execute(
                    "UPDATE operations
                     SET status = 'completed', result = ?3, error = NULL, finished_at = ?4,
                         lease_owner = NULL, lease_expires_at = NULL
                     WHERE id = ?1 AND status = 'processing' AND lease_owner = ?2",
                    params![id.0, owner.as_str(), result_json, now.timestamp_millis()],
                )
                .map_err(sql("mark_completed"))?;
            Ok(updated == 1)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: OperationId,
        owner: LeaseOwner,
        error: String,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.blocking("mark_failed", move |conn| {
            let updated = conn
                .execute(
                    "UPDATE operations
                     SET status = 'failed', error = ?3, result = NULL, finished_at = ?4,
                         lease_owner = NULL, lease_expires_at = NULL
                     WHERE id = ?1 AND status = 'processing' AND lease_owner = ?2",
                    params![id.0, owner.as_str(), error, now.timestamp_millis()],
                )
                .map_err(sql("mark_failed"))?;
            Ok(updated == 1)
        })
        .await
    }

    async fn reset_stuck(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<OperationId>, StoreError> {
        self.blocking("reset_stuck", move |conn| {
            let mut stmt = conn
                .prepare(
                    "UPDATE operations
                     SET status = 'queued', processing_started_at = NULL,
                         lease_owner = NULL, lease_expires_at = NULL
                     WHERE status = 'processing' AND processing_started_at <= ?1
                     RETURNING id",
                )
                .map_err(sql("reset_stuck"))?;
            let mut ids = stmt
                .query_map(params![started_before.timestamp_millis()], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(sql("reset_stuck"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(sql("reset_stuck"))?;
            ids.sort_unstable();
            Ok(ids.into_iter().map(OperationId).collect())
        })
        .await
    }

    async fn counts(&self) -> Result<QueueCounts, StoreError> {
        self.blocking("counts", |conn| {
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM operations GROUP BY status")
                .map_err(sql("counts"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(sql("counts"))?;

            let mut counts = QueueCounts::default();
            for row in rows {
                let (status, count) = row.map_err(sql("counts"))?;
                let count = u64::try_from(count).unwrap_or(0);
                match status.parse::<OperationStatus>() {
                    Ok(OperationStatus::Queued) => counts.queued = count,
                    Ok(OperationStatus::Processing) => counts.processing = count,
                    Ok(OperationStatus::Completed) => counts.completed = count,
                    Ok(OperationStatus::Failed) => counts.failed = count,
                    Err(e) => return Err(StoreError::corrupt("status", 0, e.to_string())),
                }
            }
            Ok(counts)
        })
        .await
    }

    async fn save_fork(
        &self,
        fork: NewFork,
        placeholder: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<ForkRecord, StoreError> {
        self.blocking("save_fork", move |conn| {
            let tx = conn.transaction().map_err(sql("save_fork"))?;

            let existing: Option<i64> = tx
                .query_row(
                    "SELECT id FROM forks WHERE fork_owner = ?1 AND fork_repo = ?2",
                    params![fork.fork.owner, fork.fork.repo],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql("save_fork"))?;
            let placeholder = match placeholder {
                Some(id) if row_exists(&tx, "forks", id).map_err(sql("save_fork"))? => Some(id),
                _ => None,
            };

            let (upstream_owner, upstream_repo) = match &fork.upstream {
                Some(upstream) => (Some(upstream.owner.clone()), Some(upstream.repo.clone())),
                None => (None, None),
            };
            let update = |id: i64| {
                tx.execute(
                    "UPDATE forks
                     SET upstream_owner = COALESCE(?2, upstream_owner),
                         upstream_repo = COALESCE(?3, upstream_repo),
                         fork_owner = ?4, fork_repo = ?5, fork_url = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        upstream_owner,
                        upstream_repo,
                        fork.fork.owner,
                        fork.fork.repo,
                        fork.fork_url
                    ],
                )
                .map_err(sql("save_fork"))
            };

            let id = match (existing, placeholder) {
                (Some(existing), Some(placeholder)) if existing != placeholder => {
                    tx.execute(
                        "UPDATE pull_requests SET fork_id = ?1 WHERE fork_id = ?2",
                        params![existing, placeholder],
                    )
                    .map_err(sql("save_fork"))?;
                    tx.execute("DELETE FROM forks WHERE id = ?1", params![placeholder])
                        .map_err(sql("save_fork"))?;
                    update(existing)?;
                    existing
                }
                (Some(id), _) | (None, Some(id)) => {
                    update(id)?;
                    id
                }
                (None, None) => {
                    tx.execute(
                        "INSERT INTO forks
                             (upstream_owner, upstream_repo, fork_owner, fork_repo, fork_url,
                              created_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            upstream_owner,
                            upstream_repo,
                            fork.fork.owner,
                            fork.fork.repo,
                            fork.fork_url,
                            now.timestamp_millis()
                        ],
                    )
                    .map_err(sql("save_fork"))?;
                    tx.last_insert_rowid()
                }
            };

            let record = query_fork(&tx, "save_fork", "WHERE id = ?1", params![id])?
                .ok_or_else(|| StoreError::storage("save_fork", format!("fork {id} vanished")))?;
            tx.commit().map_err(sql("save_fork"))?;
            Ok(record)
        })
        .await
    }

    async fn get_fork(&self, id: i64) -> Result<Option<ForkRecord>, StoreError> {
        self.blocking("get_fork", move |conn| {
            query_fork(conn, "get_fork", "WHERE id = ?1", params![id])
        })
        .await
    }

    async fn find_fork(&self, fork: RepoId) -> Result<Option<ForkRecord>, StoreError> {
        self.blocking("find_fork", move |conn| {
            query_fork(
                conn,
                "find_fork",
                "WHERE fork_owner = ?1 AND fork_repo = ?2",
                params![fork.owner, fork.repo],
            )
        })
        .await
    }

    async fn save_pr(
        &self,
        pr: NewPr,
        placeholder: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<PrRecord, StoreError> {
        self.blocking("save_pr", move |conn| {
            let target = match placeholder {
                Some(id) if row_exists(conn, "pull_requests", id).map_err(sql("save_pr"))? => {
                    Some(id)
                }
                _ => None,
            };

            let id = match target {
                Some(id) => {
                    conn.execute(
                        "UPDATE pull_requests
                         SET source_pr_url = COALESCE(?2, source_pr_url),
                             fork_id = COALESCE(?3, fork_id),
                             pr_url = COALESCE(?4, pr_url),
                             title = COALESCE(?5, title),
                             head_branch = COALESCE(?6, head_branch),
                             status = ?7, updated_at = ?8
                         WHERE id = ?1",
                        params![
                            id,
                            pr.source_pr_url,
                            pr.fork_id,
                            pr.pr_url,
                            pr.title,
                            pr.head_branch,
                            pr.status,
                            now.timestamp_millis()
                        ],
                    )
                    .map_err(sql("save_pr"))?;
                    id
                }
                None => {
                    conn.execute(
                        "INSERT INTO pull_requests
                             (source_pr_url, fork_id, pr_url, title, head_branch, status,
                              updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            pr.source_pr_url,
                            pr.fork_id,
                            pr.pr_url,
                            pr.title,
                            pr.head_branch,
                            pr.status,
                            now.timestamp_millis()
                        ],
                    )
                    .map_err(sql("save_pr"))?;
                    conn.last_insert_rowid()
                }
            };

            query_pr(conn, "save_pr", id)?
                .ok_or_else(|| StoreError::storage("save_pr", format!("pull request {id} vanished")))
        })
        .await
    }

    async fn get_pr(&self, id: i64) -> Result<Option<PrRecord>, StoreError> {
        self.blocking("get_pr", move |conn| query_pr(conn, "get_pr", id))
            .await
    }
}
