// # Worker file server (C6)
//
// Single-purpose read-only service: `(database, file) -> (available, size)`
// followed by the file streamed in worker-configured buffer-sized records
// until EOF. Refuses databases not in its configuration and files outside
// the data directory; honors no cancellation once streaming has started
// (spec §4.6) — a reader that wants out just closes its socket.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::io::AsyncReadExt;

use crate::common::DatabaseName;
use crate::error::{DbError, FsError, Result};
use crate::protocol::FileOpenResponse;
use crate::transport::TcpConnection;

/// Serves file-open and byte-stream requests against one worker's data
/// directory, restricted to a fixed set of configured databases.
pub struct FileServer {
    data_dir: PathBuf,
    buf_size: usize,
    known_databases: HashSet<DatabaseName>,
}

impl FileServer {
    pub fn new(data_dir: PathBuf, buf_size: usize, known_databases: HashSet<DatabaseName>) -> Self {
        Self { data_dir, buf_size: buf_size.max(4096), known_databases }
    }

    /// Resolves `(database, file)` to a path under the data directory,
    /// refusing unconfigured databases and any path that would escape it
    /// (absolute paths, `..` components).
    fn resolve(&self, database: &str, file: &str) -> Result<PathBuf> {
        if !self.known_databases.contains(database) {
            return Err(DbError::InvalidArgument(format!("database not configured: {database}")));
        }
        let candidate = Path::new(file);
        if candidate.is_absolute() || candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(DbError::InvalidArgument(format!("file path escapes data directory: {file}")));
        }
        Ok(self.data_dir.join(database).join(candidate))
    }

    /// Handles an `Open` request: stats the file, returns `(available, size)`
    /// without opening it for reading yet.
    pub async fn open(&self, database: &str, file: &str) -> Result<FileOpenResponse> {
        let path = match self.resolve(database, file) {
            Ok(p) => p,
            Err(_) => return Ok(FileOpenResponse { available: false, size: 0 }),
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(FileOpenResponse { available: true, size: meta.len() }),
            _ => Ok(FileOpenResponse { available: false, size: 0 }),
        }
    }

    /// Streams the file's contents over `conn` as a sequence of
    /// `Message::FileChunk` frames in `buf_size`-sized records, then a final
    /// empty chunk marking EOF. Errors mid-stream simply propagate; the
    /// connection is not rolled back, matching the no-cancellation contract.
    pub async fn stream(&self, database: &str, file: &str, conn: &TcpConnection, request_id: u64) -> Result<()> {
        let path = self.resolve(database, file)?;
        let mut f = tokio::fs::File::open(&path)
            .await
            .map_err(|_| DbError::Filesystem(FsError::FileRead(path.display().to_string())))?;

        let mut buf = vec![0u8; self.buf_size];
        loop {
            let n = f
                .read(&mut buf)
                .await
                .map_err(|_| DbError::Filesystem(FsError::FileRead(path.display().to_string())))?;
            let chunk = crate::protocol::Message::FileChunk(buf[..n].to_vec());
            conn.send_message(request_id, &chunk).await?;
            if n == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_with_file(dir: &std::path::Path, database: &str, file: &str, contents: &[u8]) -> FileServer {
        std::fs::create_dir_all(dir.join(database)).unwrap();
        std::fs::write(dir.join(database).join(file), contents).unwrap();
        let mut known = HashSet::new();
        known.insert(database.to_string());
        FileServer::new(dir.to_path_buf(), 8192, known)
    }

    #[tokio::test]
    async fn open_reports_size_for_known_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with_file(dir.path(), "db1", "chunk_5.myd", b"hello world");
        let resp = server.open("db1", "chunk_5.myd").await.unwrap();
        assert!(resp.available);
        assert_eq!(resp.size, 11);
    }

    #[tokio::test]
    async fn open_refuses_unconfigured_database() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with_file(dir.path(), "db1", "chunk_5.myd", b"x");
        let resp = server.open("unknown_db", "chunk_5.myd").await.unwrap();
        assert!(!resp.available);
    }

    #[tokio::test]
    async fn resolve_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_with_file(dir.path(), "db1", "chunk_5.myd", b"x");
        assert!(server.resolve("db1", "../../etc/passwd").is_err());
        assert!(server.resolve("db1", "/etc/passwd").is_err());
    }
}
