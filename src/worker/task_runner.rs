// # Task runner (C11)
//
// Executes one received `Task` against the local MySQL server and streams
// back `Result` batches with backpressure (spec §4.11). Actual row
// execution is modeled behind `SqlExecutor` since MySQL itself is an
// external collaborator (spec §1 Non-goals); the runner's job is the
// fragment substitution, batching, and backpressure contract around it.

use async_trait::async_trait;

use crate::catalog::Task;
use crate::error::{DbError, Result};
use crate::protocol::{PROTOBUF_DESIRED_LIMIT, PROTOBUF_HARD_LIMIT};

/// One row of a query result, opaque to the runner beyond its byte size.
#[derive(Debug, Clone)]
pub struct Row(pub Vec<u8>);

impl Row {
    fn size(&self) -> usize {
        self.0.len()
    }
}

/// Executes substituted SQL statements and streams rows back one at a time.
/// A real implementation runs these unbuffered against the local server;
/// tests substitute a canned row producer.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<Vec<Row>>;
}

/// Per-query kill outcomes distinguished on cancellation (spec §4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Nop,
    Success,
    ErrorConnecting,
    ErrorProcessing,
}

/// Header carried with every result batch (spec §4.11 step 3).
#[derive(Debug, Clone)]
pub struct ResultHeader {
    pub protocol: u32,
    pub size: usize,
    pub md5: Option<u32>,
    pub worker_name: String,
    pub large_result: bool,
}

/// One batch of rows plus its header and the `continues` flag signalling
/// more batches follow for the same task.
#[derive(Debug, Clone)]
pub struct ResultBatch {
    pub header: ResultHeader,
    pub rows: Vec<Row>,
    pub continues: bool,
}

/// A callback modeling the transport's outbound stream: returns `Ok(())` on
/// success, an error if the channel reports a send failure (spec §4.11
/// step 5, "cancels the query").
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn send_batch(&self, batch: ResultBatch) -> Result<()>;
    /// The transport's `waitForDoneWithThis()` confirmation between
    /// batches, applying backpressure (spec §4.11 step 6).
    async fn wait_for_done(&self) -> Result<()>;
}

pub struct TaskRunner {
    worker_name: String,
    desired_limit: usize,
    hard_limit: usize,
}

impl TaskRunner {
    pub fn new(worker_name: String) -> Self {
        Self {
            worker_name,
            desired_limit: PROTOBUF_DESIRED_LIMIT,
            hard_limit: PROTOBUF_HARD_LIMIT,
        }
    }

    #[cfg(test)]
    fn with_limits(worker_name: String, desired_limit: usize, hard_limit: usize) -> Self {
        Self { worker_name, desired_limit, hard_limit }
    }

    /// Substitutes each subchunk id into the task's SQL fragment templates
    /// (spec §4.11 step 1). A fragment may contain at most one `%S`
    /// placeholder per subchunk; no placeholder means the fragment runs
    /// once regardless of subchunk count.
    fn materialize_statements(task: &Task) -> Vec<String> {
        let mut statements = Vec::new();
        for fragment in &task.fragments {
            if fragment.contains("%S") {
                if task.subchunk_ids.is_empty() {
                    statements.push(fragment.replace("%S", "0"));
                } else {
                    for sub in &task.subchunk_ids {
                        statements.push(fragment.replace("%S", &sub.to_string()));
                    }
                }
            } else {
                statements.push(fragment.clone());
            }
        }
        statements
    }

    /// Runs every statement of `task` through `executor`, emitting batches
    /// to `sink` once the accumulated batch would exceed `desired_limit`,
    /// failing if a single row exceeds `hard_limit` (spec §4.11 step 4).
    pub async fn run(&self, task: &Task, executor: &dyn SqlExecutor, sink: &dyn ResultSink) -> Result<()> {
        let statements = Self::materialize_statements(task);

        let mut pending: Vec<Row> = Vec::new();
        let mut pending_size = 0usize;

        for sql in statements {
            let rows = executor.execute(&sql).await?;
            for row in rows {
                let row_size = row.size();
                if row_size > self.hard_limit {
                    return Err(DbError::InvalidState(format!(
                        "row of {row_size} bytes exceeds the hard result-size limit of {}",
                        self.hard_limit
                    )));
                }
                if pending_size + row_size > self.desired_limit && !pending.is_empty() {
                    self.flush(&mut pending, &mut pending_size, true, sink).await?;
                    sink.wait_for_done().await?;
                }
                pending_size += row_size;
                pending.push(row);
                if pending.len() % 256 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }

        self.flush(&mut pending, &mut pending_size, false, sink).await?;
        Ok(())
    }

    async fn flush(
        &self,
        pending: &mut Vec<Row>,
        pending_size: &mut usize,
        continues: bool,
        sink: &dyn ResultSink,
    ) -> Result<()> {
        let rows = std::mem::take(pending);
        let size = *pending_size;
        *pending_size = 0;
        let batch = ResultBatch {
            header: ResultHeader {
                protocol: 2,
                size,
                md5: None,
                worker_name: self.worker_name.clone(),
                large_result: size > self.desired_limit,
            },
            rows,
            continues,
        };
        sink.send_batch(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    struct EchoExecutor;

    #[async_trait]
    impl SqlExecutor for EchoExecutor {
        async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
            Ok(vec![Row(sql.as_bytes().to_vec())])
        }
    }

    struct CollectingSink {
        batches: Mutex<Vec<ResultBatch>>,
        waits: AtomicUsize,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self { batches: Mutex::new(Vec::new()), waits: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl ResultSink for CollectingSink {
        async fn send_batch(&self, batch: ResultBatch) -> Result<()> {
            self.batches.lock().await.push(batch);
            Ok(())
        }
        async fn wait_for_done(&self) -> Result<()> {
            self.waits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn task(fragments: Vec<&str>, subchunks: Vec<u64>) -> Task {
        Task {
            query_id: 1,
            job_id: None,
            chunk: 7,
            database: "db1".to_string(),
            fragments: fragments.into_iter().map(String::from).collect(),
            subchunk_ids: subchunks,
        }
    }

    #[tokio::test]
    async fn substitutes_subchunk_placeholder_per_listed_subchunk() {
        let t = task(vec!["SELECT * FROM t_%S"], vec![1, 2, 3]);
        let statements = TaskRunner::materialize_statements(&t);
        assert_eq!(statements, vec!["SELECT * FROM t_1", "SELECT * FROM t_2", "SELECT * FROM t_3"]);
    }

    #[tokio::test]
    async fn fragment_without_placeholder_runs_once() {
        let t = task(vec!["SELECT 1"], vec![1, 2, 3]);
        let statements = TaskRunner::materialize_statements(&t);
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn single_row_exceeding_hard_limit_fails() {
        let runner = TaskRunner::with_limits("w1".to_string(), 16, 32);
        struct BigExecutor;
        #[async_trait]
        impl SqlExecutor for BigExecutor {
            async fn execute(&self, _sql: &str) -> Result<Vec<Row>> {
                Ok(vec![Row(vec![0u8; 64])])
            }
        }
        let sink = CollectingSink::new();
        let t = task(vec!["SELECT 1"], vec![]);
        let result = runner.run(&t, &BigExecutor, &sink).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn exceeding_desired_limit_splits_into_multiple_continues_batches() {
        let runner = TaskRunner::with_limits("w1".to_string(), 8, 1024);
        struct ManyRowsExecutor;
        #[async_trait]
        impl SqlExecutor for ManyRowsExecutor {
            async fn execute(&self, _sql: &str) -> Result<Vec<Row>> {
                Ok(vec![Row(vec![0u8; 6]), Row(vec![0u8; 6]), Row(vec![0u8; 6])])
            }
        }
        let sink = CollectingSink::new();
        let t = task(vec!["SELECT 1"], vec![]);
        runner.run(&t, &ManyRowsExecutor, &sink).await.unwrap();
        let batches = sink.batches.lock().await;
        assert!(batches.len() >= 2);
        assert!(batches[0].continues);
        assert!(!batches.last().unwrap().continues);
    }
}
