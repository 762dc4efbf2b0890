// Rebalance planning (spec §8 scenario 5): chunks are skewed heavily onto
// one worker; the plan should move chunks off the hottest worker until no
// worker sits more than `stop_pct` above the average, and `estimate_only`
// must not issue any REPLICATE/DELETE traffic.

mod common;

use qserv_rs::catalog::{Configuration, Database, DatabaseFamily, Replica, ReplicaStatus, Worker};
use qserv_rs::core::Runtime;
use qserv_rs::jobs::{Job, RebalanceJob};
use qserv_rs::protocol::{Message, ReplicaPayload, ReplicaRequestBody, ReplicationResponse, WorkerStatus};

fn success(payload: ReplicaPayload) -> Message {
    Message::Response(ReplicationResponse {
        status: WorkerStatus::Success,
        extended_status: qserv_rs::protocol::ExtendedStatus::None,
        performance: Default::default(),
        payload,
    })
}

fn find_all_only_handler(replicas: Vec<Replica>) -> impl Fn(Message) -> Message {
    move |msg| match msg {
        Message::Replica(ReplicaRequestBody::FindAll { .. }) => success(ReplicaPayload::Many(replicas.clone())),
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

fn replica(worker: &str, chunk: u64) -> Replica {
    Replica {
        worker: worker.to_string(),
        database: "LSST".to_string(),
        family: "LSST".to_string(),
        chunk,
        status: ReplicaStatus::Complete,
        verify_time: 0,
        files: vec![],
    }
}

#[tokio::test]
async fn estimate_only_plan_drains_the_hottest_worker_without_dispatching() {
    // 100 good chunks spread 80/10/10 across three workers.
    let w1_chunks: Vec<Replica> = (0..80).map(|c| replica("w1", c)).collect();
    let w2_chunks: Vec<Replica> = (80..90).map(|c| replica("w2", c)).collect();
    let w3_chunks: Vec<Replica> = (90..100).map(|c| replica("w3", c)).collect();

    let w1_addr = common::spawn_fake_worker(find_all_only_handler(w1_chunks.clone())).await;
    let w2_addr = common::spawn_fake_worker(find_all_only_handler(w2_chunks.clone())).await;
    let w3_addr = common::spawn_fake_worker(find_all_only_handler(w3_chunks.clone())).await;

    let mut config = Configuration::default();
    config.workers = vec![worker_entry("w1", w1_addr), worker_entry("w2", w2_addr), worker_entry("w3", w3_addr)];
    config.families = vec![DatabaseFamily { name: "LSST".to_string(), min_replication_level: 1 }];
    config.databases = vec![Database {
        name: "LSST".to_string(),
        family: "LSST".to_string(),
        partitioned_tables: vec!["Object".to_string()],
        regular_tables: vec![],
    }];

    let runtime = Runtime::start(config).await.unwrap();

    let mut job = RebalanceJob::new(1, "LSST".to_string(), 10.0, 5.0, true);
    job.run(&runtime).await.unwrap();

    assert!(!job.plan.is_empty(), "expected a non-empty rebalance plan");
    assert!(job.plan.iter().all(|mv| mv.from == "w1"), "only the overloaded worker should shed chunks: {:?}", job.plan);
    assert!(job.plan.iter().all(|mv| mv.to != "w1"));

    // Applying the plan should leave no worker meaningfully above the
    // average once `stop_pct` is honored.
    let mut counts = std::collections::HashMap::new();
    counts.insert("w1".to_string(), 80i64);
    counts.insert("w2".to_string(), 10i64);
    counts.insert("w3".to_string(), 10i64);
    for mv in &job.plan {
        *counts.get_mut(&mv.from).unwrap() -= 1;
        *counts.get_mut(&mv.to).unwrap() += 1;
    }
    let avg = 100.0 / 3.0;
    let start_threshold = avg * 1.10;
    assert!(
        *counts.get("w1").unwrap() as f64 <= start_threshold + 1.0,
        "w1 still well above average after the plan: {counts:?}"
    );
    assert!(*counts.get("w1").unwrap() < 80, "plan should have moved at least one chunk off w1");

    // estimate_only must not have touched any replica state.
    for chunk in 0..80u64 {
        let replicas = runtime.replicas().for_chunk_database(chunk, "LSST".to_string()).await.unwrap();
        assert_eq!(replicas.iter().filter(|r| r.worker == "w1").count(), 1);
    }

    runtime.shutdown().await;
}
