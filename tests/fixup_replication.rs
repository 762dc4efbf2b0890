// Replication placement via FixUpJob (spec §8 scenario 4): a chunk below
// its family's replication floor gets replicated out until every worker
// reports a complete copy.

mod common;

use qserv_rs::catalog::{Configuration, Database, DatabaseFamily, Replica, ReplicaStatus, Worker};
use qserv_rs::core::Runtime;
use qserv_rs::jobs::{FixUpJob, Job, JobOutcome};
use qserv_rs::protocol::{Message, ReplicaPayload, ReplicaRequestBody, ReplicationResponse, WorkerStatus};

fn success(payload: ReplicaPayload) -> Message {
    Message::Response(ReplicationResponse {
        status: WorkerStatus::Success,
        extended_status: qserv_rs::protocol::ExtendedStatus::None,
        performance: Default::default(),
        payload,
    })
}

fn worker_handler(name: &'static str, initial: Vec<Replica>) -> impl Fn(Message) -> Message {
    move |msg| match msg {
        Message::Replica(ReplicaRequestBody::FindAll { .. }) => success(ReplicaPayload::Many(initial.clone())),
        Message::Replica(ReplicaRequestBody::Replicate { database, chunk, .. }) => success(ReplicaPayload::One(Replica {
            worker: name.to_string(),
            database,
            family: "LSST".to_string(),
            chunk,
            status: ReplicaStatus::Complete,
            verify_time: 0,
            files: vec![],
        })),
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
async fn under_replicated_chunk_is_brought_up_to_the_family_floor() {
    let w1_addr = common::spawn_fake_worker(worker_handler(
        "w1",
        vec![Replica {
            worker: "w1".to_string(),
            database: "LSST".to_string(),
            family: "LSST".to_string(),
            chunk: 7,
            status: ReplicaStatus::Complete,
            verify_time: 0,
            files: vec![],
        }],
    ))
    .await;
    let w2_addr = common::spawn_fake_worker(worker_handler("w2", vec![])).await;
    let w3_addr = common::spawn_fake_worker(worker_handler("w3", vec![])).await;

    let mut config = Configuration::default();
    config.workers = vec![worker_entry("w1", w1_addr), worker_entry("w2", w2_addr), worker_entry("w3", w3_addr)];
    config.families = vec![DatabaseFamily { name: "LSST".to_string(), min_replication_level: 3 }];
    config.databases = vec![Database {
        name: "LSST".to_string(),
        family: "LSST".to_string(),
        partitioned_tables: vec!["Object".to_string()],
        regular_tables: vec![],
    }];

    let runtime = Runtime::start(config).await.unwrap();

    // A single pass adds one replica per under-replicated chunk; the health
    // loop calls FixUpJob repeatedly until the floor is reached, so the test
    // drives the same number of passes here.
    for _ in 0..3 {
        let mut job = FixUpJob::new(qserv_rs::jobs::next_request_id(), "LSST".to_string());
        let outcome = job.run(&runtime).await.unwrap();
        assert_eq!(outcome, JobOutcome::Success);
    }

    let replicas = runtime.replicas().for_chunk_database(7, "LSST".to_string()).await.unwrap();
    let complete: Vec<_> = replicas.iter().filter(|r| r.status == ReplicaStatus::Complete).collect();
    assert_eq!(complete.len(), 3, "expected chunk 7 complete on all three workers, got {replicas:?}");

    let w1 = runtime.catalog().get_worker("w1").unwrap();
    assert!(w1.enabled);

    runtime.shutdown().await;
}
