//! Remus client shell: a thin async DEALER-socket RPC surface over
//! `remus_protocol`, mirroring `remus::Client`'s four verbs (`canMesh`,
//! `submitJob`, `jobStatus`, `retrieveMesh`) from the original C++ library
//! this protocol was distilled from — plus `TERMINATE_JOB`, which the
//! distilled spec adds. The broker is the only thing that understands job
//! lifecycle; this crate just speaks the wire format on a client's behalf.

pub mod error;

pub use error::{ClientError, Result};

use remus_protocol::{
    JobId, JobMessage, JobRequirements, JobResponse, JobResponseBody, JobResult, JobSubmission,
    ServiceType, StatusEnvelope,
};
use std::time::Duration;
use tracing::debug;
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Default time a client will wait for a broker reply before giving up.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection parameters for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub broker_addr: String,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(broker_addr: impl Into<String>) -> Self {
        Self {
            broker_addr: broker_addr.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// What `retrieve` returns: either the job is done and here's its result, or
/// it's still somewhere in its lifecycle and here's its latest status.
#[derive(Debug, Clone)]
pub enum RetrieveOutcome {
    Ready(JobResult),
    Pending(StatusEnvelope),
}

/// A connection to a Remus broker's client-facing socket.
///
/// One [`Client`] is one DEALER socket; the broker's ROUTER socket on the
/// other end multiplexes as many of these as connect. Calls are request/
/// response and resolve in submission order on this connection (ZMTP frame
/// ordering), but nothing prevents issuing several jobs before retrieving
/// any of them, matching `examples/BasicClient/clientMain.cxx`'s pattern of
/// submitting a batch of jobs up front and polling all of them afterward.
pub struct Client {
    socket: DealerSocket,
    request_timeout: Duration,
}

impl Client {
    /// Connect to the broker's client-facing ROUTER socket.
    pub async fn connect(config: ClientConfig) -> Result<Self> {
        let mut socket = DealerSocket::new();
        socket
            .connect(&config.broker_addr)
            .await
            .map_err(|source| ClientError::Connect {
                addr: config.broker_addr.clone(),
                source,
            })?;
        debug!(addr = %config.broker_addr, "client connected to broker");
        Ok(Self {
            socket,
            request_timeout: config.request_timeout,
        })
    }

    /// `CAN_MESH`: ask whether the broker can currently satisfy this
    /// requirements triple, either via an idle worker or its factory.
    pub async fn can_mesh(&mut self, requirements: &JobRequirements) -> Result<bool> {
        let msg = JobMessage::new(ServiceType::CanMesh, requirements.clone(), vec![]);
        match self.roundtrip(msg).await? {
            JobResponseBody::Capability { can_mesh } => Ok(can_mesh),
            JobResponseBody::Invalid => Ok(false),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `MAKE_MESH`: submit a job, returning the broker-assigned [`JobId`].
    pub async fn submit_job(
        &mut self,
        requirements: JobRequirements,
        submission: JobSubmission,
    ) -> Result<JobId> {
        let payload = serde_json::to_vec(&submission)?;
        let msg = JobMessage::new(ServiceType::MakeMesh, requirements, vec![payload]);
        match self.roundtrip(msg).await? {
            JobResponseBody::Accepted { job_id } => Ok(job_id),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `MESH_STATUS`: poll a job's current status envelope.
    pub async fn job_status(
        &mut self,
        requirements: &JobRequirements,
        id: JobId,
    ) -> Result<StatusEnvelope> {
        let msg = JobMessage::new(
            ServiceType::MeshStatus,
            requirements.clone(),
            vec![id.to_string().into_bytes()],
        );
        match self.roundtrip(msg).await? {
            JobResponseBody::Status(status) => Ok(status),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `RETRIEVE_MESH`: fetch a finished job's result, or its current status
    /// if it has not finished yet. Once this returns [`RetrieveOutcome::Ready`]
    /// the broker has forgotten the job.
    pub async fn retrieve_mesh(
        &mut self,
        requirements: &JobRequirements,
        id: JobId,
    ) -> Result<RetrieveOutcome> {
        let msg = JobMessage::new(
            ServiceType::RetrieveMesh,
            requirements.clone(),
            vec![id.to_string().into_bytes()],
        );
        match self.roundtrip(msg).await? {
            JobResponseBody::Result(envelope) => Ok(RetrieveOutcome::Ready(envelope.result)),
            JobResponseBody::Status(status) => Ok(RetrieveOutcome::Pending(status)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// `TERMINATE_JOB`: cancel a queued job, or signal an assigned one's
    /// worker to abort. Fire-and-forget from the caller's perspective; the
    /// broker always acknowledges with `Accepted`.
    pub async fn terminate_job(&mut self, requirements: &JobRequirements, id: JobId) -> Result<()> {
        let msg = JobMessage::new(
            ServiceType::TerminateJob,
            requirements.clone(),
            vec![id.to_string().into_bytes()],
        );
        self.roundtrip(msg).await?;
        Ok(())
    }

    async fn roundtrip(&mut self, msg: JobMessage) -> Result<JobResponseBody> {
        let frames = msg.pack();
        self.send_frames(frames).await?;
        let response = self.recv_response().await?;
        Ok(response.body)
    }

    async fn send_frames(&mut self, mut frames: Vec<Vec<u8>>) -> Result<()> {
        if frames.is_empty() {
            return Ok(());
        }
        let first = frames.remove(0);
        let mut multipart = ZmqMessage::from(first);
        for frame in frames {
            multipart.push_back(frame.into());
        }
        self.socket.send(multipart).await.map_err(ClientError::Send)
    }

    async fn recv_response(&mut self) -> Result<JobResponse> {
        let multipart = tokio::time::timeout(self.request_timeout, self.socket.recv())
            .await
            .map_err(|_| ClientError::Timeout(self.request_timeout))?
            .map_err(ClientError::Recv)?;

        let frames: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
        if frames.is_empty() {
            return Err(ClientError::EmptyResponse);
        }
        Ok(JobResponse::unpack(&frames)?)
    }
}

#[derive(clap::Parser, Debug)]
#[command(name = "remus-client", about = "Submit and track a Remus mesh job")]
pub struct ClientArgs {
    /// ZMQ address of the broker's client-facing socket
    #[arg(long, env = "REMUS_CLIENT_ADDR", default_value_t = format!("tcp://127.0.0.1:{}", remus_protocol::DEFAULT_CLIENT_PORT))]
    pub broker_addr: String,

    /// Input mesh type name, e.g. "raw_edges"
    #[arg(long, default_value = "raw_edges")]
    pub input_type: String,

    /// Output mesh type name, e.g. "mesh2d"
    #[arg(long, default_value = "mesh2d")]
    pub output_type: String,

    /// Worker name this job's requirements select for
    #[arg(long, default_value = "BasicWorker")]
    pub worker_name: String,

    /// Inline text payload to submit under the default payload key
    #[arg(long, default_value = "TEST")]
    pub data: String,

    /// Poll interval while waiting on a submitted job, in milliseconds
    #[arg(long, default_value_t = 500)]
    pub poll_interval_ms: u64,
}
