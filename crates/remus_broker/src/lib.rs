//! Remus broker library.
//!
//! Owns the hard part of Remus: the event loop, the job queue, the worker
//! pool, the active-jobs table, and the pluggable worker-factory
//! abstraction. The broker never generates a mesh itself — external
//! worker processes do that, reached over `remus_protocol`'s wire format.

pub mod active_jobs;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod pool;
pub mod queue;
pub mod router;

pub use active_jobs::{ActiveJob, ActiveJobs};
pub use config::BrokerConfig;
pub use error::{BrokerError, Result};
pub use events::{EventPayload, EventPublisher, Topic};
pub use factory::{FixedCapabilityFactory, NullFactory, QueueEverythingFactory, WorkerFactory};
pub use pool::{Worker, WorkerPool, WorkerState};
pub use queue::{JobQueue, QueuedJob};
pub use router::Router;

#[derive(clap::Parser, Debug)]
#[command(name = "remus-broker", about = "Remus job-dispatch broker")]
pub struct BrokerArgs {
    /// ZMQ bind address for clients
    #[arg(long, env = "REMUS_CLIENT_ADDR", default_value_t = format!("tcp://0.0.0.0:{}", remus_protocol::DEFAULT_CLIENT_PORT))]
    pub client_addr: String,

    /// ZMQ bind address for workers
    #[arg(long, env = "REMUS_WORKER_ADDR", default_value_t = format!("tcp://0.0.0.0:{}", remus_protocol::DEFAULT_WORKER_PORT))]
    pub worker_addr: String,

    /// ZMQ bind address for the telemetry PUB socket; omit to disable publishing
    #[arg(long, env = "REMUS_PUBLISH_ADDR")]
    pub publish_addr: Option<String>,

    /// Disable the telemetry PUB socket entirely, regardless of --publish-addr
    #[arg(long)]
    pub no_publish: bool,

    /// Heartbeat interval in milliseconds; also the router's poll timeout
    #[arg(long, env = "REMUS_HEARTBEAT_INTERVAL_MS", default_value_t = remus_protocol::DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,

    /// Directory of `.remus` worker descriptor files for the filesystem factory.
    /// If omitted, the broker runs with a factory that never launches workers.
    #[arg(long, env = "REMUS_FACTORY_DIR")]
    pub factory_dir: Option<std::path::PathBuf>,

    /// Maximum number of worker processes the factory may have running at once
    #[arg(long, default_value_t = 8)]
    pub max_workers: usize,
}

impl From<&BrokerArgs> for BrokerConfig {
    fn from(args: &BrokerArgs) -> Self {
        let publish_addr = if args.no_publish {
            None
        } else {
            Some(args.publish_addr.clone().unwrap_or_else(|| {
                format!("tcp://0.0.0.0:{}", remus_protocol::DEFAULT_PUBLISH_PORT)
            }))
        };
        Self {
            client_addr: args.client_addr.clone(),
            worker_addr: args.worker_addr.clone(),
            publish_addr,
            heartbeat_interval_ms: args.heartbeat_interval_ms,
            max_workers: args.max_workers,
        }
    }
}
