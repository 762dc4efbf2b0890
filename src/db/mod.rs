// # Database services (C13)
//
// Persists controller identity, job records (one discriminating row per
// subtype), request records, and replica/replica-file rows (spec §4.13,
// §6). Backed by `rusqlite` rather than the MySQL client the worker's own
// query execution uses — that crate is explicitly out of scope for this
// core (spec §1); bookkeeping persistence is not, and a bundled SQLite
// driver gives a single-file, dependency-free store for it (see DESIGN.md).
//
// Every call shells out to `tokio::task::spawn_blocking` since `rusqlite`
// is synchronous (spec §9 design note on suspension points).

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::catalog::{Configuration, Replica, ReplicaFile, ReplicaStatus};
use crate::common::{ChunkNumber, DatabaseName, WorkerId};
use crate::error::{DbError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS controller (
    id TEXT PRIMARY KEY,
    host TEXT NOT NULL,
    start_time INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS job (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    controller_id TEXT,
    state TEXT NOT NULL,
    extended_state TEXT,
    begin_time INTEGER,
    end_time INTEGER
);

CREATE TABLE IF NOT EXISTS job_fixup (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL, num_failed_locks INTEGER NOT NULL DEFAULT 0);
CREATE TABLE IF NOT EXISTS job_find_all (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS job_replicate (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL, num_replicas INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS job_purge (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL, num_replicas INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS job_rebalance (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL, start_pct REAL NOT NULL, stop_pct REAL NOT NULL, estimate_only INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS job_delete_worker (job_id INTEGER PRIMARY KEY, worker TEXT NOT NULL, permanent INTEGER NOT NULL);
CREATE TABLE IF NOT EXISTS job_move_replica (job_id INTEGER PRIMARY KEY, family TEXT NOT NULL, chunk INTEGER NOT NULL, src TEXT NOT NULL, dst TEXT NOT NULL, purge INTEGER NOT NULL);

CREATE TABLE IF NOT EXISTS request (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    worker TEXT NOT NULL,
    job_id INTEGER,
    state TEXT NOT NULL,
    extended_state TEXT,
    c_create_time INTEGER,
    c_start_time INTEGER,
    w_receive_time INTEGER,
    w_start_time INTEGER,
    w_finish_time INTEGER,
    c_finish_time INTEGER
);
CREATE TABLE IF NOT EXISTS request_replica_create (request_id INTEGER PRIMARY KEY, database TEXT NOT NULL, chunk INTEGER NOT NULL, source_worker TEXT NOT NULL);
CREATE TABLE IF NOT EXISTS request_replica_delete (request_id INTEGER PRIMARY KEY, database TEXT NOT NULL, chunk INTEGER NOT NULL);

CREATE TABLE IF NOT EXISTS replica (
    worker TEXT NOT NULL,
    database TEXT NOT NULL,
    family TEXT NOT NULL,
    chunk INTEGER NOT NULL,
    status TEXT NOT NULL,
    verify_time INTEGER NOT NULL,
    PRIMARY KEY (worker, database, chunk)
);
CREATE TABLE IF NOT EXISTS replica_file (
    worker TEXT NOT NULL,
    database TEXT NOT NULL,
    chunk INTEGER NOT NULL,
    name TEXT NOT NULL,
    size INTEGER NOT NULL,
    mtime INTEGER NOT NULL,
    checksum INTEGER,
    begin_transfer_time INTEGER,
    end_transfer_time INTEGER,
    PRIMARY KEY (worker, database, chunk, name),
    FOREIGN KEY (worker, database, chunk) REFERENCES replica(worker, database, chunk) ON DELETE CASCADE
);
"#;

/// Handle to the bookkeeping store. Cheap to clone (wraps an `Arc`).
pub struct DatabaseServices {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseServices {
    /// Opens (creating if absent) the SQLite file named by
    /// `config.common.database_name`, or an in-memory store when that name
    /// is `:memory:` (the default for tests).
    pub fn open(config: &Configuration) -> Result<Self> {
        let conn = if config.common.database_name == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.common.database_name)
        }
        .map_err(|e| DbError::Storage(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| DbError::Storage(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| DbError::Storage(format!("failed to apply schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
    ) -> Result<T> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .map_err(|e| DbError::Storage(format!("blocking task panicked: {e}")))?
    }

    /// Insert-or-update by `(worker, database, chunk)` (spec §4.4): a
    /// `Complete` replica is upserted along with its files; anything else
    /// deletes the row (cascading its files).
    pub async fn upsert_replica(&self, replica: Replica) -> Result<()> {
        self.with_conn(move |conn| {
            if replica.status == ReplicaStatus::Complete {
                conn.execute(
                    "INSERT INTO replica (worker, database, family, chunk, status, verify_time)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     ON CONFLICT(worker, database, chunk) DO UPDATE SET
                        family = excluded.family,
                        status = excluded.status,
                        verify_time = excluded.verify_time",
                    params![
                        replica.worker,
                        replica.database,
                        replica.family,
                        replica.chunk as i64,
                        status_str(replica.status),
                        replica.verify_time
                    ],
                )
                .map_err(|e| DbError::Storage(e.to_string()))?;

                conn.execute(
                    "DELETE FROM replica_file WHERE worker = ?1 AND database = ?2 AND chunk = ?3",
                    params![replica.worker, replica.database, replica.chunk as i64],
                )
                .map_err(|e| DbError::Storage(e.to_string()))?;

                for file in &replica.files {
                    insert_file(conn, &replica.worker, &replica.database, replica.chunk, file)?;
                }
            } else {
                conn.execute(
                    "DELETE FROM replica WHERE worker = ?1 AND database = ?2 AND chunk = ?3",
                    params![replica.worker, replica.database, replica.chunk as i64],
                )
                .map_err(|e| DbError::Storage(e.to_string()))?;
            }
            Ok(())
        })
        .await
    }

    /// Bulk replace by `(worker, database)` (spec §4.4): computes the set
    /// difference against what's stored, deletes rows present only in the
    /// old set, upserts the rest. An empty `new` bulk-deletes everything for
    /// that `(worker, database)`.
    pub async fn bulk_replace_replicas(
        &self,
        worker: WorkerId,
        database: DatabaseName,
        new: Vec<Replica>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction().map_err(|e| DbError::Storage(e.to_string()))?;

            let keep: std::collections::HashSet<i64> =
                new.iter().map(|r| r.chunk as i64).collect();

            let mut stmt = tx
                .prepare("SELECT chunk FROM replica WHERE worker = ?1 AND database = ?2")
                .map_err(|e| DbError::Storage(e.to_string()))?;
            let existing: Vec<i64> = stmt
                .query_map(params![worker, database], |row| row.get(0))
                .map_err(|e| DbError::Storage(e.to_string()))?
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| DbError::Storage(e.to_string()))?;
            drop(stmt);

            for chunk in existing {
                if !keep.contains(&chunk) {
                    tx.execute(
                        "DELETE FROM replica WHERE worker = ?1 AND database = ?2 AND chunk = ?3",
                        params![worker, database, chunk],
                    )
                    .map_err(|e| DbError::Storage(e.to_string()))?;
                }
            }

            for replica in &new {
                if replica.status == ReplicaStatus::Complete {
                    tx.execute(
                        "INSERT INTO replica (worker, database, family, chunk, status, verify_time)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(worker, database, chunk) DO UPDATE SET
                            family = excluded.family, status = excluded.status, verify_time = excluded.verify_time",
                        params![
                            replica.worker,
                            replica.database,
                            replica.family,
                            replica.chunk as i64,
                            status_str(replica.status),
                            replica.verify_time
                        ],
                    )
                    .map_err(|e| DbError::Storage(e.to_string()))?;

                    tx.execute(
                        "DELETE FROM replica_file WHERE worker = ?1 AND database = ?2 AND chunk = ?3",
                        params![replica.worker, replica.database, replica.chunk as i64],
                    )
                    .map_err(|e| DbError::Storage(e.to_string()))?;
                    for file in &replica.files {
                        insert_file(&tx, &replica.worker, &replica.database, replica.chunk, file)?;
                    }
                }
            }

            tx.commit().map_err(|e| DbError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub async fn replicas_for_chunk_database(
        &self,
        chunk: ChunkNumber,
        database: DatabaseName,
    ) -> Result<Vec<Replica>> {
        self.with_conn(move |conn| {
            load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica WHERE chunk = ?1 AND database = ?2",
                params![chunk as i64, database],
            )
        })
        .await
    }

    pub async fn replicas_for_worker(
        &self,
        worker: WorkerId,
        database: Option<DatabaseName>,
    ) -> Result<Vec<Replica>> {
        self.with_conn(move |conn| match &database {
            Some(db) => load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica WHERE worker = ?1 AND database = ?2",
                params![worker, db],
            ),
            None => load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica WHERE worker = ?1",
                params![worker],
            ),
        })
        .await
    }

    pub async fn replicas_for_worker_chunk(
        &self,
        worker: WorkerId,
        chunk: ChunkNumber,
        family: Option<String>,
    ) -> Result<Vec<Replica>> {
        self.with_conn(move |conn| match &family {
            Some(f) => load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica WHERE worker = ?1 AND chunk = ?2 AND family = ?3",
                params![worker, chunk as i64, f],
            ),
            None => load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica WHERE worker = ?1 AND chunk = ?2",
                params![worker, chunk as i64],
            ),
        })
        .await
    }

    /// Distinct chunk numbers with at least one known replica for
    /// `database`, used by the query session's secondary-index stand-in to
    /// discover chunk placement (spec §4.10 step 4).
    pub async fn distinct_chunks(&self, database: DatabaseName) -> Result<Vec<ChunkNumber>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT chunk FROM replica WHERE database = ?1 ORDER BY chunk ASC")
                .map_err(|e| DbError::Storage(e.to_string()))?;
            let rows = stmt
                .query_map(params![database], |row| row.get::<_, i64>(0))
                .map_err(|e| DbError::Storage(e.to_string()))?;
            let mut chunks = Vec::new();
            for row in rows {
                chunks.push(row.map_err(|e| DbError::Storage(e.to_string()))? as ChunkNumber);
            }
            Ok(chunks)
        })
        .await
    }

    pub async fn oldest_replicas(&self, limit: usize) -> Result<Vec<Replica>> {
        self.with_conn(move |conn| {
            load_replicas(
                conn,
                "SELECT worker, database, family, chunk, status, verify_time FROM replica ORDER BY verify_time ASC LIMIT ?1",
                params![limit as i64],
            )
        })
        .await
    }

    /// Records a job row. `kind` names the subtype table the caller also
    /// populates (e.g. `"fixup"` alongside a row in `job_fixup`).
    pub async fn record_job(&self, id: i64, kind: String, controller_id: String, begin_time: i64) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO job (id, kind, controller_id, state, begin_time) VALUES (?1, ?2, ?3, 'CREATED', ?4)",
                params![id, kind, controller_id, begin_time],
            )
            .map_err(|e| DbError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }

    pub async fn update_job_state(&self, id: i64, state: String, extended_state: Option<String>, end_time: Option<i64>) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE job SET state = ?2, extended_state = ?3, end_time = ?4 WHERE id = ?1",
                params![id, state, extended_state, end_time],
            )
            .map_err(|e| DbError::Storage(e.to_string()))?;
            Ok(())
        })
        .await
    }
}

fn insert_file(
    conn: &Connection,
    worker: &str,
    database: &str,
    chunk: ChunkNumber,
    file: &ReplicaFile,
) -> Result<()> {
    conn.execute(
        "INSERT INTO replica_file (worker, database, chunk, name, size, mtime, checksum, begin_transfer_time, end_transfer_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            worker,
            database,
            chunk as i64,
            file.name,
            file.size as i64,
            file.mtime,
            file.checksum,
            file.begin_transfer_time,
            file.end_transfer_time
        ],
    )
    .map_err(|e| DbError::Storage(e.to_string()))?;
    Ok(())
}

fn load_replicas(conn: &Connection, sql: &str, params: &[&dyn rusqlite::ToSql]) -> Result<Vec<Replica>> {
    let mut stmt = conn.prepare(sql).map_err(|e| DbError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params, |row| {
            let worker: String = row.get(0)?;
            let database: String = row.get(1)?;
            let family: String = row.get(2)?;
            let chunk: i64 = row.get(3)?;
            let status: String = row.get(4)?;
            let verify_time: i64 = row.get(5)?;
            Ok((worker, database, family, chunk, status, verify_time))
        })
        .map_err(|e| DbError::Storage(e.to_string()))?;

    let mut replicas = Vec::new();
    for row in rows {
        let (worker, database, family, chunk, status, verify_time) =
            row.map_err(|e| DbError::Storage(e.to_string()))?;
        let files = load_files(conn, &worker, &database, chunk)?;
        replicas.push(Replica {
            worker,
            database,
            family,
            chunk: chunk as u64,
            status: status_from_str(&status),
            verify_time,
            files,
        });
    }
    Ok(replicas)
}

fn load_files(conn: &Connection, worker: &str, database: &str, chunk: i64) -> Result<Vec<ReplicaFile>> {
    let mut stmt = conn
        .prepare(
            "SELECT name, size, mtime, checksum, begin_transfer_time, end_transfer_time
             FROM replica_file WHERE worker = ?1 AND database = ?2 AND chunk = ?3",
        )
        .map_err(|e| DbError::Storage(e.to_string()))?;
    let rows = stmt
        .query_map(params![worker, database, chunk], |row| {
            Ok(ReplicaFile {
                name: row.get(0)?,
                size: row.get::<_, i64>(1)? as u64,
                mtime: row.get(2)?,
                checksum: row.get::<_, Option<i64>>(3)?.map(|v| v as u32),
                begin_transfer_time: row.get(4)?,
                end_transfer_time: row.get(5)?,
            })
        })
        .map_err(|e| DbError::Storage(e.to_string()))?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| DbError::Storage(e.to_string()))
}

fn status_str(status: ReplicaStatus) -> &'static str {
    match status {
        ReplicaStatus::NotFound => "NOT_FOUND",
        ReplicaStatus::Corrupt => "CORRUPT",
        ReplicaStatus::Incomplete => "INCOMPLETE",
        ReplicaStatus::Complete => "COMPLETE",
    }
}

fn status_from_str(s: &str) -> ReplicaStatus {
    match s {
        "COMPLETE" => ReplicaStatus::Complete,
        "INCOMPLETE" => ReplicaStatus::Incomplete,
        "CORRUPT" => ReplicaStatus::Corrupt,
        _ => ReplicaStatus::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ReplicaFile;

    fn memory_config() -> Configuration {
        let mut config = Configuration::default();
        config.common.database_name = ":memory:".to_string();
        config
    }

    fn complete_replica(worker: &str, database: &str, chunk: u64) -> Replica {
        Replica {
            worker: worker.to_string(),
            database: database.to_string(),
            family: "LSST".to_string(),
            chunk,
            status: ReplicaStatus::Complete,
            verify_time: 100,
            files: vec![ReplicaFile {
                name: "chunk.csv".to_string(),
                size: 10,
                mtime: 1,
                checksum: Some(42),
                begin_transfer_time: None,
                end_transfer_time: None,
            }],
        }
    }

    #[tokio::test]
    async fn upsert_then_query_round_trips() {
        let db = DatabaseServices::open(&memory_config()).unwrap();
        db.upsert_replica(complete_replica("w1", "db1", 7)).await.unwrap();

        let replicas = db
            .replicas_for_chunk_database(7, "db1".to_string())
            .await
            .unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].files.len(), 1);
        assert_eq!(replicas[0].status, ReplicaStatus::Complete);
    }

    #[tokio::test]
    async fn non_complete_replica_deletes_the_row() {
        let db = DatabaseServices::open(&memory_config()).unwrap();
        db.upsert_replica(complete_replica("w1", "db1", 7)).await.unwrap();

        let mut incomplete = complete_replica("w1", "db1", 7);
        incomplete.status = ReplicaStatus::Incomplete;
        db.upsert_replica(incomplete).await.unwrap();

        let replicas = db.replicas_for_worker("w1".to_string(), None).await.unwrap();
        assert!(replicas.is_empty());
    }

    #[tokio::test]
    async fn bulk_replace_drops_only_what_the_new_set_omits() {
        let db = DatabaseServices::open(&memory_config()).unwrap();
        db.upsert_replica(complete_replica("w1", "db1", 1)).await.unwrap();
        db.upsert_replica(complete_replica("w1", "db1", 2)).await.unwrap();

        db.bulk_replace_replicas("w1".to_string(), "db1".to_string(), vec![complete_replica("w1", "db1", 2)])
            .await
            .unwrap();

        let replicas = db.replicas_for_worker("w1".to_string(), None).await.unwrap();
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].chunk, 2);
    }

    #[tokio::test]
    async fn bulk_replace_with_empty_set_deletes_everything() {
        let db = DatabaseServices::open(&memory_config()).unwrap();
        db.upsert_replica(complete_replica("w1", "db1", 1)).await.unwrap();

        db.bulk_replace_replicas("w1".to_string(), "db1".to_string(), vec![])
            .await
            .unwrap();

        let replicas = db.replicas_for_worker("w1".to_string(), None).await.unwrap();
        assert!(replicas.is_empty());
    }
}
