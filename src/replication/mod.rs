// # Replica descriptor store (C4)
//
// A thin typed façade over `db::DatabaseServices` (C13): the contract named
// in spec §4.4 (insert-or-update, bulk replace, the four query shapes) is
// implemented entirely in terms of the persistence layer so there is one
// source of truth for persisted replica rows.

use std::sync::Arc;

use crate::catalog::Replica;
use crate::common::{ChunkNumber, DatabaseName, WorkerId};
use crate::db::DatabaseServices;
use crate::error::Result;

/// Replica bookkeeping used by jobs and the health loop. Every method here
/// maps 1:1 onto a `DatabaseServices` call; this type exists so callers
/// depend on the C4 contract rather than the C13 storage shape directly.
pub struct ReplicaStore {
    db: Arc<DatabaseServices>,
}

impl ReplicaStore {
    pub fn new(db: Arc<DatabaseServices>) -> Self {
        Self { db }
    }

    pub async fn upsert(&self, replica: Replica) -> Result<()> {
        self.db.upsert_replica(replica).await
    }

    pub async fn bulk_replace(
        &self,
        worker: WorkerId,
        database: DatabaseName,
        replicas: Vec<Replica>,
    ) -> Result<()> {
        self.db.bulk_replace_replicas(worker, database, replicas).await
    }

    pub async fn for_chunk_database(&self, chunk: ChunkNumber, database: DatabaseName) -> Result<Vec<Replica>> {
        self.db.replicas_for_chunk_database(chunk, database).await
    }

    pub async fn for_worker(&self, worker: WorkerId, database: Option<DatabaseName>) -> Result<Vec<Replica>> {
        self.db.replicas_for_worker(worker, database).await
    }

    pub async fn for_worker_chunk(
        &self,
        worker: WorkerId,
        chunk: ChunkNumber,
        family: Option<String>,
    ) -> Result<Vec<Replica>> {
        self.db.replicas_for_worker_chunk(worker, chunk, family).await
    }

    pub async fn oldest(&self, limit: usize) -> Result<Vec<Replica>> {
        self.db.oldest_replicas(limit).await
    }

    pub async fn distinct_chunks(&self, database: DatabaseName) -> Result<Vec<ChunkNumber>> {
        self.db.distinct_chunks(database).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Configuration, ReplicaStatus};

    fn replica(worker: &str, chunk: u64) -> Replica {
        Replica {
            worker: worker.to_string(),
            database: "db1".to_string(),
            family: "LSST".to_string(),
            chunk,
            status: ReplicaStatus::Complete,
            verify_time: 1,
            files: vec![],
        }
    }

    #[tokio::test]
    async fn upsert_then_read_back_by_chunk() {
        let db = Arc::new(DatabaseServices::open(&Configuration::default()).unwrap());
        let store = ReplicaStore::new(db);
        store.upsert(replica("w1", 5)).await.unwrap();
        let found = store.for_chunk_database(5, "db1".to_string()).await.unwrap();
        assert_eq!(found.len(), 1);
    }
}
