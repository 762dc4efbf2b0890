// Result merger (C12): validates each incoming batch, accumulates rows
// under a per-query row/byte bound, and honors `continues` to know when a
// task is still producing more batches. Grounded on the teacher's
// `networking::transport` reassembly pattern of checking a header before
// trusting the payload.

use crate::error::{DbError, Result};
use crate::worker::{ResultBatch, Row};

const SUPPORTED_PROTOCOL: u32 = 2;

/// Per-query bounds enforced while merging (spec §4.12).
#[derive(Debug, Clone, Copy)]
pub struct MergeLimits {
    pub max_rows: usize,
    pub max_bytes: usize,
}

impl Default for MergeLimits {
    fn default() -> Self {
        Self { max_rows: 10_000_000, max_bytes: 1024 * 1024 * 1024 }
    }
}

/// Accumulates rows across one or more tasks until every task reports
/// `continues = false`.
pub struct ResultMerger {
    limits: MergeLimits,
    rows: Vec<Row>,
    total_bytes: usize,
    pending_tasks: usize,
    failed: Option<DbError>,
}

impl ResultMerger {
    pub fn new(limits: MergeLimits, expected_tasks: usize) -> Self {
        Self { limits, rows: Vec::new(), total_bytes: 0, pending_tasks: expected_tasks, failed: None }
    }

    /// Whether the merger has already stopped accepting batches after an
    /// earlier error (spec §4.12 "stop-on-error").
    pub fn failed(&self) -> Option<&DbError> {
        self.failed.as_ref()
    }

    /// Folds one batch in. Returns an error (and latches `failed`) on
    /// protocol mismatch or bound violation; further batches are rejected
    /// once failed.
    pub fn accept(&mut self, batch: ResultBatch) -> Result<()> {
        if let Some(err) = &self.failed {
            return Err(DbError::InvalidState(format!("merger already failed: {err}")));
        }

        if batch.header.protocol != SUPPORTED_PROTOCOL {
            let err = DbError::InvalidArgument(format!(
                "unsupported result protocol version: {}",
                batch.header.protocol
            ));
            self.failed = Some(DbError::InvalidArgument(format!(
                "unsupported result protocol version: {}",
                batch.header.protocol
            )));
            return Err(err);
        }

        let observed_size: usize = batch.rows.iter().map(|r| r.0.len()).sum();
        if observed_size != batch.header.size {
            let err = DbError::InvalidArgument(format!(
                "result batch size mismatch: header says {}, observed {observed_size}",
                batch.header.size
            ));
            self.failed = Some(DbError::InvalidArgument("result batch size mismatch".to_string()));
            return Err(err);
        }

        if let Some(expected_md5) = batch.header.md5 {
            let computed = crc32c::crc32c(&batch.rows.iter().flat_map(|r| r.0.clone()).collect::<Vec<u8>>());
            if computed != expected_md5 {
                let err = DbError::InvalidArgument("result payload checksum mismatch".to_string());
                self.failed = Some(DbError::InvalidArgument("result payload checksum mismatch".to_string()));
                return Err(err);
            }
        }

        self.total_bytes += observed_size;
        if self.total_bytes > self.limits.max_bytes {
            let err = DbError::InvalidArgument("merge byte bound exceeded".to_string());
            self.failed = Some(DbError::InvalidArgument("merge byte bound exceeded".to_string()));
            return Err(err);
        }

        self.rows.extend(batch.rows);
        if self.rows.len() > self.limits.max_rows {
            let err = DbError::InvalidArgument("merge row bound exceeded".to_string());
            self.failed = Some(DbError::InvalidArgument("merge row bound exceeded".to_string()));
            return Err(err);
        }

        if !batch.continues {
            self.pending_tasks = self.pending_tasks.saturating_sub(1);
        }

        Ok(())
    }

    pub fn done(&self) -> bool {
        self.failed.is_none() && self.pending_tasks == 0
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::ResultHeader;

    fn batch(rows: Vec<Vec<u8>>, continues: bool) -> ResultBatch {
        let size = rows.iter().map(|r| r.len()).sum();
        ResultBatch {
            header: ResultHeader { protocol: 2, size, md5: None, worker_name: "w1".to_string(), large_result: false },
            rows: rows.into_iter().map(Row).collect(),
            continues,
        }
    }

    #[test]
    fn accumulates_rows_until_all_tasks_finish() {
        let mut merger = ResultMerger::new(MergeLimits::default(), 2);
        merger.accept(batch(vec![vec![1]], false)).unwrap();
        assert!(!merger.done());
        merger.accept(batch(vec![vec![2]], false)).unwrap();
        assert!(merger.done());
        assert_eq!(merger.into_rows().len(), 2);
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let mut merger = ResultMerger::new(MergeLimits::default(), 1);
        let mut bad = batch(vec![vec![1]], false);
        bad.header.protocol = 3;
        assert!(merger.accept(bad).is_err());
        assert!(merger.failed().is_some());
    }

    #[test]
    fn stops_accepting_after_a_failure() {
        let mut merger = ResultMerger::new(MergeLimits::default(), 1);
        let mut bad = batch(vec![vec![1]], false);
        bad.header.protocol = 3;
        let _ = merger.accept(bad);
        let good = batch(vec![vec![1]], false);
        assert!(merger.accept(good).is_err());
    }

    #[test]
    fn row_bound_violation_is_reported() {
        let mut merger = ResultMerger::new(MergeLimits { max_rows: 1, max_bytes: 1024 }, 1);
        assert!(merger.accept(batch(vec![vec![1], vec![2]], false)).is_err());
    }
}
