//! Remus client binary.
//!
//! Mirrors `examples/BasicClient/clientMain.cxx` from the C++ original this
//! protocol was distilled from: ask whether the broker can satisfy a job,
//! submit it, then poll until it finishes or fails.
//!
//! Usage:
//!     remus-client --broker-addr tcp://127.0.0.1:50505 --data "TEST"

use clap::Parser;
use remus_client::{Client, ClientArgs, ClientConfig, RetrieveOutcome};
use remus_protocol::{ContentFormat, JobContent, JobRequirements, JobSubmission, MeshIOType, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();

    remus_logging::init_logging(remus_logging::LogConfig {
        app_name: "remus-client",
        verbose: false,
        tui_mode: false,
    })?;

    let requirements = JobRequirements::new(
        MeshIOType::new(args.input_type.clone(), args.output_type.clone()),
        args.worker_name.clone(),
        Vec::new(),
    );

    let mut client = Client::connect(ClientConfig::new(args.broker_addr.clone())).await?;

    if !client.can_mesh(&requirements).await? {
        println!(
            "server doesn't support {} meshes for worker {}",
            requirements.io_type, requirements.worker_name
        );
        return Ok(());
    }

    let mut payload = HashMap::new();
    payload.insert(
        remus_protocol::DEFAULT_PAYLOAD_KEY.to_string(),
        JobContent {
            format: ContentFormat::Text,
            bytes: args.data.clone().into_bytes(),
        },
    );
    let submission = JobSubmission {
        requirements: requirements.clone(),
        payload,
    };

    let job_id = client.submit_job(requirements.clone(), submission).await?;
    info!(%job_id, "job submitted");
    println!("job id {job_id}");

    loop {
        match client.retrieve_mesh(&requirements, job_id).await? {
            RetrieveOutcome::Ready(result) => {
                println!("job {job_id} finished: {result:?}");
                break;
            }
            RetrieveOutcome::Pending(status) => {
                if status.status == StatusCode::InProgress {
                    println!("job {job_id} progress: {}% {}", status.progress, status.message);
                } else {
                    println!("job {job_id} status: {:?}", status.status);
                }
                if status.status == StatusCode::Failed || status.status == StatusCode::Expired {
                    break;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(args.poll_interval_ms)).await;
    }

    Ok(())
}
