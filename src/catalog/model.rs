// Value types for the data model (spec §3): Chunk, Replica, ReplicaFile, Task.
//
// Plain structs, no interior mutability — aggregation and locking live in the
// owning registries (`Catalog`, `replication::ReplicaStore`), not here.

use serde::{Deserialize, Serialize};

use crate::common::{ChunkNumber, DatabaseName, FamilyName, JobId, WorkerId};
use crate::error::{DbError, ParseError, Result};

/// A horizontal partition identity. All tables of a family with the same
/// chunk number are colocated (invariant 6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Chunk {
    pub family: FamilyName,
    pub number: ChunkNumber,
}

/// Parses a chunk number token, rejecting the underscore-prefixed form the
/// worker request engine's parser rejects upstream (spec §4.5).
pub fn parse_chunk_number(token: &str) -> Result<ChunkNumber> {
    if token.starts_with('_') {
        return Err(DbError::Parse(ParseError::Syntax(format!(
            "chunk identifiers may not start with an underscore: {token}"
        ))));
    }
    token.parse::<ChunkNumber>().map_err(|_| {
        DbError::Parse(ParseError::Syntax(format!("not a valid chunk number: {token}")))
    })
}

/// Completeness status of a replica (spec §3 invariant 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    NotFound,
    Corrupt,
    Incomplete,
    Complete,
}

/// A single file backing a chunk replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaFile {
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub checksum: Option<u32>,
    pub begin_transfer_time: Option<i64>,
    pub end_transfer_time: Option<i64>,
}

/// One copy of a chunk's files, on one worker, for one database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    pub worker: WorkerId,
    pub database: DatabaseName,
    pub family: FamilyName,
    pub chunk: ChunkNumber,
    pub status: ReplicaStatus,
    pub verify_time: i64,
    pub files: Vec<ReplicaFile>,
}

impl Replica {
    /// Derives status from an observed file set versus the expected one
    /// (spec §3 invariant 5): equal sets -> Complete, non-empty mismatch ->
    /// Incomplete, empty observed set -> NotFound.
    pub fn classify(observed: &[ReplicaFile], expected_names: &[String]) -> ReplicaStatus {
        if observed.is_empty() {
            return ReplicaStatus::NotFound;
        }
        let observed_names: std::collections::BTreeSet<&str> =
            observed.iter().map(|f| f.name.as_str()).collect();
        let expected: std::collections::BTreeSet<&str> =
            expected_names.iter().map(|s| s.as_str()).collect();
        if observed_names == expected {
            ReplicaStatus::Complete
        } else {
            ReplicaStatus::Incomplete
        }
    }
}

/// A per-chunk unit of work produced by the query session (C10) for the
/// worker task runner (C11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub query_id: u64,
    pub job_id: Option<JobId>,
    pub chunk: ChunkNumber,
    pub database: DatabaseName,
    pub fragments: Vec<String>,
    pub subchunk_ids: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_underscore_prefixed_chunk_numbers() {
        assert!(parse_chunk_number("_123").is_err());
        assert_eq!(parse_chunk_number("123").unwrap(), 123);
    }

    #[test]
    fn classifies_empty_observed_set_as_not_found() {
        let status = Replica::classify(&[], &["a.csv".to_string()]);
        assert_eq!(status, ReplicaStatus::NotFound);
    }

    #[test]
    fn classifies_matching_set_as_complete() {
        let files = vec![ReplicaFile {
            name: "a.csv".to_string(),
            size: 10,
            mtime: 0,
            checksum: None,
            begin_transfer_time: None,
            end_transfer_time: None,
        }];
        let status = Replica::classify(&files, &["a.csv".to_string()]);
        assert_eq!(status, ReplicaStatus::Complete);
    }

    #[test]
    fn classifies_mismatched_nonempty_set_as_incomplete() {
        let files = vec![ReplicaFile {
            name: "a.csv".to_string(),
            size: 10,
            mtime: 0,
            checksum: None,
            begin_transfer_time: None,
            end_transfer_time: None,
        }];
        let status = Replica::classify(&files, &["a.csv".to_string(), "b.csv".to_string()]);
        assert_eq!(status, ReplicaStatus::Incomplete);
    }
}
