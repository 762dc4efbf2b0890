// Query session (C10): recognize -> parse -> resolve -> secondary-index ->
// plan -> dispatch -> merge, for one user statement. The secondary index and
// task dispatcher are external collaborators (spec §4.10 step 4, step 6) and
// are modeled as pluggable traits the same way C11 models `SqlExecutor` and
// `ResultSink` — this keeps the session path testable without a live
// chunk-placement service or worker process on the other end.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Mutex as AsyncMutex;

use crate::catalog::{ReplicaStatus, Task};
use crate::common::{ChunkNumber, DatabaseName, WorkerId};
use crate::core::Runtime;
use crate::error::{DbError, ParseError, Result};
use crate::query::admin::{recognize, AdminStatement};
use crate::query::merger::{MergeLimits, ResultMerger};
use crate::query::parser::parse_select;
use crate::query::planner::plan;
use crate::worker::{ResultBatch, ResultSink, Row};

/// Converts constraints from a parsed statement into the set of chunks that
/// might satisfy it. The real secondary index is an external service (spec
/// §4.10 step 4); the catalog-backed stand-in here answers from whatever
/// chunks C4 already knows about for the resolved database.
#[async_trait]
pub trait SecondaryIndex: Send + Sync {
    async fn chunks_for_database(&self, runtime: &Runtime, database: &str) -> Result<Vec<ChunkNumber>>;
}

pub struct CatalogSecondaryIndex;

#[async_trait]
impl SecondaryIndex for CatalogSecondaryIndex {
    async fn chunks_for_database(&self, runtime: &Runtime, database: &str) -> Result<Vec<ChunkNumber>> {
        runtime.replicas().distinct_chunks(database.to_string()).await
    }
}

/// Sends one materialized `Task` to `worker` and streams its `ResultBatch`es
/// into `sink` (spec §4.10 step 6, step 7). The real transport for this is
/// the same framed Messenger connection C1/C2 define for replica traffic;
/// kept abstract here so the session can be exercised without a live worker.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, worker: &WorkerId, task: Task, sink: Arc<dyn ResultSink>) -> Result<()>;
}

struct MergingSink {
    merger: Arc<AsyncMutex<ResultMerger>>,
}

#[async_trait]
impl ResultSink for MergingSink {
    async fn send_batch(&self, batch: ResultBatch) -> Result<()> {
        self.merger.lock().await.accept(batch)
    }

    async fn wait_for_done(&self) -> Result<()> {
        Ok(())
    }
}

/// Outcome of one statement passed through the session.
pub enum SessionResponse {
    Rows(Vec<Row>),
    Recognized(AdminStatement),
}

pub struct QuerySession {
    runtime: Arc<Runtime>,
    secondary_index: Arc<dyn SecondaryIndex>,
    dispatcher: Arc<dyn TaskDispatcher>,
    limits: MergeLimits,
}

impl QuerySession {
    pub fn new(runtime: Arc<Runtime>, secondary_index: Arc<dyn SecondaryIndex>, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self { runtime, secondary_index, dispatcher, limits: MergeLimits::default() }
    }

    pub async fn execute(&self, query_id: u64, sql: &str) -> Result<SessionResponse> {
        match recognize(sql)? {
            AdminStatement::Select { sql } | AdminStatement::SubmitSelect { sql } => {
                self.run_select(query_id, &sql).await.map(SessionResponse::Rows)
            }
            other => Ok(SessionResponse::Recognized(other)),
        }
    }

    async fn run_select(&self, query_id: u64, sql: &str) -> Result<Vec<Row>> {
        let stmt = parse_select(sql)?;
        let database = self.resolve_database(&stmt.from_table)?;

        let chunks = self.secondary_index.chunks_for_database(&self.runtime, &database).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let query_plan = plan(&stmt, sql);

        let mut assignments = Vec::new();
        for chunk in &chunks {
            let replicas = self.runtime.replicas().for_chunk_database(*chunk, database.clone()).await?;
            if let Some(replica) = replicas.into_iter().find(|r| r.status == ReplicaStatus::Complete) {
                assignments.push((replica.worker, *chunk));
            }
        }

        let merger = Arc::new(AsyncMutex::new(ResultMerger::new(self.limits, assignments.len())));
        let sink: Arc<dyn ResultSink> = Arc::new(MergingSink { merger: Arc::clone(&merger) });

        let dispatches = assignments.into_iter().map(|(worker, chunk)| {
            let dispatcher = Arc::clone(&self.dispatcher);
            let sink = Arc::clone(&sink);
            let database = database.clone();
            let fragment = query_plan.chunk_template.replace("%CC%", &chunk.to_string());
            async move {
                let task = Task { query_id, job_id: None, chunk, database, fragments: vec![fragment], subchunk_ids: vec![] };
                dispatcher.dispatch(&worker, task, sink).await
            }
        });

        for result in join_all(dispatches).await {
            result?;
        }
        drop(sink);

        let mut guard = merger.lock().await;
        if let Some(err) = guard.failed() {
            return Err(DbError::InvalidState(format!("query failed during merge: {err}")));
        }
        let mut rows = guard.take_rows();
        drop(guard);

        if query_plan.keep_order_by_on_merge {
            let ascending = stmt.order_by.first().map(|o| o.ascending).unwrap_or(true);
            rows.sort_by(|a, b| if ascending { a.0.cmp(&b.0) } else { b.0.cmp(&a.0) });
        }
        if let Some(limit) = stmt.limit {
            rows.truncate(limit as usize);
        }
        Ok(rows)
    }

    /// Resolves the dominant database for an unqualified table reference by
    /// scanning every configured database's table lists (spec §4.10 step 3).
    fn resolve_database(&self, table: &str) -> Result<DatabaseName> {
        for family in self.runtime.catalog().list_families() {
            for database in self.runtime.catalog().databases_in_family(&family.name) {
                if database.partitioned_tables.iter().any(|t| t == table) || database.regular_tables.iter().any(|t| t == table) {
                    return Ok(database.name);
                }
            }
        }
        Err(DbError::Parse(ParseError::Unsupported(format!("unknown table: {table}"))))
    }
}
