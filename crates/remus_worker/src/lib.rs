//! Remus worker shell.

pub mod error;
pub mod worker;

pub use error::{Result, WorkerError};
pub use worker::{EchoHandler, MeshHandler, ProgressSink, Worker, WorkerConfig};

#[derive(clap::Parser, Debug)]
#[command(name = "remus-worker", about = "Connect a mesher to a Remus broker")]
pub struct WorkerArgs {
    /// ZMQ address of the broker's worker-facing socket
    #[arg(long, env = "REMUS_WORKER_ADDR", default_value_t = format!("tcp://127.0.0.1:{}", remus_protocol::DEFAULT_WORKER_PORT))]
    pub broker_addr: String,

    /// Input mesh type this worker advertises, e.g. "raw_edges"
    #[arg(long, default_value = "raw_edges")]
    pub input_type: String,

    /// Output mesh type this worker advertises, e.g. "mesh2d"
    #[arg(long, default_value = "mesh2d")]
    pub output_type: String,

    /// Worker name, matched against a client's `JobRequirements::worker_name`
    #[arg(long, default_value = "BasicWorker")]
    pub worker_name: String,

    /// Heartbeat interval, in milliseconds; keep below the broker's own
    /// `--heartbeat-interval-ms` so this worker isn't declared dead while idle
    #[arg(long, default_value_t = remus_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,
}
