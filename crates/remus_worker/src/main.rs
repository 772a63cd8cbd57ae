//! Remus worker binary.
//!
//! Mirrors `examples/BasicWorker/workerMain.cxx` from the C++ original this
//! protocol was distilled from: register a mesh type with the broker, wait
//! for a job, report progress, and return a result. Without a real mesher
//! wired in through [`remus_worker::MeshHandler`] this binary runs the
//! bundled [`remus_worker::EchoHandler`], which just echoes its input back
//! with a greeting appended — useful for exercising a broker end to end.
//!
//! Usage:
//!     remus-worker --broker-addr tcp://127.0.0.1:50510

use clap::Parser;
use remus_protocol::{JobRequirements, MeshIOType};
use remus_worker::{EchoHandler, Worker, WorkerArgs, WorkerConfig};
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = WorkerArgs::parse();

    remus_logging::init_logging(remus_logging::LogConfig {
        app_name: "remus-worker",
        verbose: false,
        tui_mode: false,
    })?;

    let requirements = JobRequirements::new(
        MeshIOType::new(args.input_type.clone(), args.output_type.clone()),
        args.worker_name.clone(),
        Vec::new(),
    );

    let config = WorkerConfig {
        broker_addr: args.broker_addr.clone(),
        requirements,
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
    };

    tracing::info!(addr = %args.broker_addr, worker_name = %args.worker_name, "starting remus worker");

    let mut worker = Worker::connect(config, EchoHandler::default()).await?;
    worker.run().await?;

    Ok(())
}
