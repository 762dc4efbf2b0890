// DeleteWorkerJob orphan detection (spec §8 scenario 6): a chunk that is
// complete only on the worker being removed must be reported as orphaned,
// and a permanent deletion must drop the worker from the catalog.

mod common;

use qserv_rs::catalog::{Configuration, Database, DatabaseFamily, Replica, ReplicaStatus, Worker};
use qserv_rs::core::Runtime;
use qserv_rs::jobs::{DeleteWorkerJob, Job, JobOutcome};
use qserv_rs::protocol::{Message, ReplicaPayload, ReplicaRequestBody, ReplicationResponse, WorkerStatus};

fn success(payload: ReplicaPayload) -> Message {
    Message::Response(ReplicationResponse {
        status: WorkerStatus::Success,
        extended_status: qserv_rs::protocol::ExtendedStatus::None,
        performance: Default::default(),
        payload,
    })
}

fn handler(initial: Vec<Replica>) -> impl Fn(Message) -> Message {
    move |msg| match msg {
        Message::Replica(ReplicaRequestBody::FindAll { .. }) => success(ReplicaPayload::Many(initial.clone())),
        Message::Replica(ReplicaRequestBody::Echo { data }) => success(ReplicaPayload::Echo(data)),
        _ => success(ReplicaPayload::None),
    }
}

fn worker_entry(name: &str, addr: std::net::SocketAddr) -> Worker {
    Worker {
        name: name.to_string(),
        svc_host: addr.ip().to_string(),
        svc_port: addr.port(),
        fs_host: addr.ip().to_string(),
        fs_port: addr.port(),
        data_dir: "/tmp/{worker}".to_string(),
        enabled: true,
        read_only: false,
    }
}

#[tokio::test]
async fn deleting_a_worker_permanently_reports_its_sole_chunk_as_orphaned() {
    let wx_addr = common::spawn_fake_worker(handler(vec![])).await;
    // w2 still tracks chunk 42 as incomplete (a stale partial copy), which
    // is enough for FindAll to surface the chunk id without claiming a
    // second complete replica.
    let w2_addr = common::spawn_fake_worker(handler(vec![Replica {
        worker: "w2".to_string(),
        database: "LSST".to_string(),
        family: "LSST".to_string(),
        chunk: 42,
        status: ReplicaStatus::Incomplete,
        verify_time: 0,
        files: vec![],
    }]))
    .await;
    let w3_addr = common::spawn_fake_worker(handler(vec![])).await;

    let mut config = Configuration::default();
    config.workers = vec![worker_entry("wx", wx_addr), worker_entry("w2", w2_addr), worker_entry("w3", w3_addr)];
    config.families = vec![DatabaseFamily { name: "LSST".to_string(), min_replication_level: 1 }];
    config.databases = vec![Database {
        name: "LSST".to_string(),
        family: "LSST".to_string(),
        partitioned_tables: vec!["Object".to_string()],
        regular_tables: vec![],
    }];

    let runtime = Runtime::start(config).await.unwrap();

    // Seed the replica the deleted worker holds; once it is disabled,
    // nothing re-queries it directly, so this stands in for state already
    // on record from an earlier FindAll pass.
    runtime
        .replicas()
        .upsert(Replica {
            worker: "wx".to_string(),
            database: "LSST".to_string(),
            family: "LSST".to_string(),
            chunk: 42,
            status: ReplicaStatus::Complete,
            verify_time: 0,
            files: vec![],
        })
        .await
        .unwrap();

    let mut job = DeleteWorkerJob::new(1, "wx".to_string(), true);
    let outcome = job.run(&runtime).await.unwrap();
    assert_eq!(outcome, JobOutcome::Success);

    assert_eq!(job.orphan_chunks, vec![("LSST".to_string(), 42)]);
    assert!(runtime.catalog().get_worker("wx").is_err(), "permanent deletion should remove the worker entry");
    assert!(!runtime.catalog().list_workers().iter().any(|w| w.name == "wx"));

    runtime.shutdown().await;
}
