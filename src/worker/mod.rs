// Worker-side components: the request engine (C5), the incremental
// checksum engine it uses, the read-only file server (C6), and the task
// runner that executes dispatched query fragments (C11).

pub mod checksum;
pub mod engine;
pub mod file_server;
pub mod replica_client;
pub mod runtime;
pub mod task_runner;

pub use engine::{RequestState, WorkerEngine, WorkerRequest};
pub use file_server::FileServer;
pub use runtime::WorkerRuntime;
pub use task_runner::{KillOutcome, ResultBatch, ResultHeader, ResultSink, Row, SqlExecutor, TaskRunner};
