// # Worker-to-worker replica client (C5 companion to C6)
//
// The dialing half of the REPLICATE flow (spec §4.5): a destination worker
// asks the source worker's service port which files make up a chunk, then
// pulls each one from the source's file server, one `FileChunk` frame at a
// time until the zero-length EOF marker `FileServer::stream` sends.

use std::path::Path;

use tokio::io::AsyncWriteExt;

use crate::catalog::{ReplicaFile, Worker};
use crate::common::DatabaseName;
use crate::error::{DbError, FsError, Result, TransportError};
use crate::protocol::{FileRequestBody, Message, ReplicaPayload, ReplicaRequestBody, ReplicationResponse};
use crate::transport::{TcpConfig, TcpTransport};

/// Pulls `(database, chunk)` from `source` into `dest_dir`, overwriting
/// whatever is already there file by file.
pub async fn fetch_chunk(source: &Worker, database: &DatabaseName, chunk: u64, dest_dir: &Path) -> Result<()> {
    let files = find_remote_files(source, database, chunk).await?;

    tokio::fs::create_dir_all(dest_dir)
        .await
        .map_err(|_| DbError::Filesystem(FsError::FileCreate(dest_dir.display().to_string())))?;

    let fs_addr = format!("{}:{}", source.fs_host, source.fs_port)
        .parse()
        .map_err(|_| DbError::InvalidArgument(format!("bad file-server address for worker {}", source.name)))?;
    let transport = TcpTransport::new(TcpConfig::default());

    for file in files {
        let conn = transport.connect(fs_addr).await?;
        let request_id = crate::jobs::next_request_id();
        conn.send_message(
            request_id,
            &Message::FileRequest(FileRequestBody::Open {
                database: database.clone(),
                file: file.name.clone(),
            }),
        )
        .await?;

        let (_, response) = conn.recv_message().await?;
        let available = match response {
            Message::FileResponse(resp) => resp.available,
            _ => return Err(DbError::InvalidState(format!("unexpected reply opening {}", file.name))),
        };
        if !available {
            continue;
        }

        let dest_path = dest_dir.join(&file.name);
        let mut out = tokio::fs::File::create(&dest_path)
            .await
            .map_err(|_| DbError::Filesystem(FsError::FileCreate(dest_path.display().to_string())))?;

        loop {
            match conn.recv_message().await? {
                (_, Message::FileChunk(bytes)) if bytes.is_empty() => break,
                (_, Message::FileChunk(bytes)) => {
                    out.write_all(&bytes).await.map_err(DbError::Io)?;
                }
                _ => return Err(DbError::InvalidState(format!("unexpected frame streaming {}", file.name))),
            }
        }
    }

    Ok(())
}

/// Asks `source`'s service port for its view of `(database, chunk)` via the
/// same `Find` request the engine already serves locally.
async fn find_remote_files(source: &Worker, database: &DatabaseName, chunk: u64) -> Result<Vec<ReplicaFile>> {
    let svc_addr = format!("{}:{}", source.svc_host, source.svc_port)
        .parse()
        .map_err(|_| DbError::InvalidArgument(format!("bad service address for worker {}", source.name)))?;
    let transport = TcpTransport::new(TcpConfig::default());
    let conn = transport.connect(svc_addr).await?;
    let request_id = crate::jobs::next_request_id();
    conn.send_message(
        request_id,
        &Message::Replica(ReplicaRequestBody::Find {
            database: database.clone(),
            chunk,
            compute_checksum: false,
        }),
    )
    .await?;

    match conn.recv_message().await? {
        (reply_id, Message::Response(ReplicationResponse { payload: ReplicaPayload::One(replica), .. })) if reply_id == request_id => {
            Ok(replica.files)
        }
        (reply_id, Message::Response(_)) if reply_id == request_id => Ok(Vec::new()),
        (reply_id, _) => Err(DbError::Transport(TransportError::ProtocolMismatch {
            expected: request_id,
            actual: reply_id,
        })),
    }
}
