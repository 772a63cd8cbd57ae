//! The worker shell: registers with a broker over a DEALER socket, waits to
//! be handed a job, runs a pluggable [`MeshHandler`], and reports status and
//! results back. Mirrors `remus::Worker`'s `getJob`/`updateStatus`/
//! `returnMeshResults` trio from the C++ original this protocol was
//! distilled from (`examples/original_source/meshserver/Worker.h`), minus
//! the signal-handling crash reporter, which this shell instead handles by
//! letting the process exit normally — the broker's liveness sweep declares
//! a silent worker dead within one heartbeat interval regardless of cause.

use crate::error::{Result, WorkerError};
use remus_protocol::{
    JobId, JobMessage, JobRequirements, JobResponse, JobResponseBody, JobResult, JobSubmission,
    ResultEnvelope, ServiceType, StatusCode, StatusEnvelope,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// A handle a running [`MeshHandler::mesh`] call uses to report incremental
/// progress while it works. Cheap to clone; backed by an unbounded channel
/// the worker's event loop drains and turns into `MESH_STATUS` frames.
#[derive(Clone)]
pub struct ProgressSink(tokio::sync::mpsc::UnboundedSender<(u8, String)>);

impl ProgressSink {
    /// Report progress in `1..=100`, with a human-readable message.
    pub fn report(&self, value: u8, message: impl Into<String>) {
        let _ = self.0.send((value, message.into()));
    }
}

/// The pluggable policy that actually generates a mesh. Everything about
/// *how* meshing happens — which executable runs, what library is linked in
/// — is external to this crate, per the specification's non-goals; this
/// trait is the seam an embedder plugs a real mesher into.
///
/// `mesh` runs on a blocking thread (via `tokio::task::spawn_blocking`), so
/// it is free to do blocking I/O or heavy computation; report progress
/// through `progress` as it goes, the way the original's `w.updateStatus`
/// calls do between sleeps.
pub trait MeshHandler: Send + Sync + 'static {
    fn mesh(
        &self,
        job_id: JobId,
        submission: JobSubmission,
        progress: ProgressSink,
    ) -> std::result::Result<JobResult, String>;
}

/// A [`MeshHandler`] that mirrors `examples/BasicWorker/workerMain.cxx`:
/// reports progress in 20% steps, then returns the default payload's text
/// content with `" and Hello Client"` appended. Useful as a smoke-test
/// handler and as the `remus-worker` binary's default when no real mesher
/// is wired in.
pub struct EchoHandler {
    pub step_delay: Duration,
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self {
            step_delay: Duration::from_millis(200),
        }
    }
}

impl MeshHandler for EchoHandler {
    fn mesh(
        &self,
        _job_id: JobId,
        submission: JobSubmission,
        progress: ProgressSink,
    ) -> std::result::Result<JobResult, String> {
        let text = submission
            .default_content()
            .map(|content| String::from_utf8_lossy(&content.bytes).into_owned())
            .unwrap_or_default();

        for step in (20..=100).step_by(20) {
            std::thread::sleep(self.step_delay);
            progress.report(step as u8, "Example Message With Random Content");
        }

        Ok(JobResult::Inline {
            bytes: format!("{text} and Hello Client").into_bytes(),
        })
    }
}

/// Construction parameters for a [`Worker`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub broker_addr: String,
    pub requirements: JobRequirements,
    /// How often to send an unsolicited `HEARTBEAT` while idle; should be
    /// comfortably under the broker's heartbeat interval so a slow poll
    /// loop doesn't get this worker declared dead.
    pub heartbeat_interval: Duration,
}

/// A connection to a Remus broker's worker-facing socket, running one
/// [`MeshHandler`] at a time.
pub struct Worker<H: MeshHandler> {
    socket: DealerSocket,
    requirements: JobRequirements,
    heartbeat_interval: Duration,
    handler: Arc<H>,
    running: bool,
}

impl<H: MeshHandler> Worker<H> {
    /// Connect to the broker and send the initial `CAN_MESH` registration.
    pub async fn connect(config: WorkerConfig, handler: H) -> Result<Self> {
        let mut socket = DealerSocket::new();
        socket
            .connect(&config.broker_addr)
            .await
            .map_err(|source| WorkerError::Connect {
                addr: config.broker_addr.clone(),
                source,
            })?;

        let mut worker = Self {
            socket,
            requirements: config.requirements,
            heartbeat_interval: config.heartbeat_interval,
            handler: Arc::new(handler),
            running: false,
        };
        worker.register().await?;
        info!(addr = %config.broker_addr, io_type = %worker.requirements.io_type, "worker registered with broker");
        Ok(worker)
    }

    async fn register(&mut self) -> Result<()> {
        let msg = JobMessage::new(ServiceType::CanMesh, self.requirements.clone(), vec![]);
        self.send_job_message(msg).await
    }

    /// Run until `stop` is called or the connection is lost. Waits for a
    /// job assignment (`MAKE_MESH`), runs it to completion, reports status
    /// and result, and repeats — one job at a time, matching the
    /// original's blocking `getJob` loop.
    pub async fn run(&mut self) -> Result<()> {
        self.running = true;
        while self.running {
            match self.recv_with_timeout().await? {
                Some(frames) => self.handle_inbound(frames).await?,
                None => self.heartbeat().await?,
            }
        }
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running = false;
    }

    async fn heartbeat(&mut self) -> Result<()> {
        let msg = JobMessage::new(ServiceType::Heartbeat, self.requirements.clone(), vec![]);
        self.send_job_message(msg).await
    }

    async fn recv_with_timeout(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        match tokio::time::timeout(self.heartbeat_interval, self.socket.recv()).await {
            Ok(Ok(multipart)) => {
                let frames = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
                Ok(Some(frames))
            }
            Ok(Err(e)) => Err(WorkerError::Recv(e)),
            Err(_) => Ok(None),
        }
    }

    /// The broker speaks two different shapes at a worker: a dispatch is a
    /// full `JobMessage` (`MAKE_MESH`, 5+ frames); an abort directive is a
    /// single-frame `JobResponse` body (see `remus_broker::router::terminate_job`).
    /// Try the former first, since it is version- and tag-checked and so
    /// cannot be mistaken for the latter.
    async fn handle_inbound(&mut self, frames: Vec<Vec<u8>>) -> Result<()> {
        match JobMessage::unpack(&frames) {
            Ok(msg) if matches!(msg.service_type(), Ok(ServiceType::MakeMesh)) => {
                self.handle_dispatch(msg).await
            }
            Ok(other) => {
                debug!(service = other.service, "ignoring unexpected JobMessage service at worker");
                Ok(())
            }
            Err(_) => match JobResponse::unpack(&frames) {
                Ok(response) => self.handle_abort(response.body),
                Err(e) => {
                    warn!("unrecognized frame from broker: {}", e);
                    Ok(())
                }
            },
        }
    }

    fn handle_abort(&mut self, body: JobResponseBody) -> Result<()> {
        if let JobResponseBody::Status(status) = body {
            if status.status == StatusCode::Failed {
                warn!(job_id = %status.job_id, "broker signaled job termination");
            }
        }
        Ok(())
    }

    async fn handle_dispatch(&mut self, msg: JobMessage) -> Result<()> {
        let id_frame = msg.payload_frames.first().ok_or(WorkerError::MissingSubmission)?;
        let payload = msg.payload_frames.get(1).ok_or(WorkerError::MissingSubmission)?;
        let job_id: JobId = std::str::from_utf8(id_frame)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(WorkerError::MissingSubmission)?;
        let submission: JobSubmission = serde_json::from_slice(payload)?;

        self.send_status(StatusEnvelope::new(job_id, StatusCode::InProgress, 1, "started")).await?;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ProgressSink(tx);
        let handler = self.handler.clone();
        let task_submission = submission.clone();
        let join = tokio::task::spawn_blocking(move || handler.mesh(job_id, task_submission, sink));

        while let Some((value, message)) = rx.recv().await {
            self.send_status(StatusEnvelope::new(job_id, StatusCode::InProgress, value, message))
                .await?;
        }

        match join.await {
            Ok(Ok(result)) => self.send_result(job_id, result).await?,
            Ok(Err(message)) => {
                self.send_status(StatusEnvelope::new(job_id, StatusCode::Failed, 0, message))
                    .await?
            }
            Err(e) => {
                self.send_status(StatusEnvelope::new(job_id, StatusCode::Failed, 0, e.to_string()))
                    .await?
            }
        }

        // The job is done; re-announce readiness for the next one.
        self.register().await
    }

    async fn send_status(&mut self, status: StatusEnvelope) -> Result<()> {
        let job_id = status.job_id;
        let payload = serde_json::to_vec(&status)?;
        let msg = JobMessage::new(ServiceType::MeshStatus, self.requirements.clone(), vec![payload]);
        debug!(%job_id, status = ?status.status, progress = status.progress, "reporting status");
        self.send_job_message(msg).await
    }

    async fn send_result(&mut self, job_id: JobId, result: JobResult) -> Result<()> {
        let envelope = ResultEnvelope { job_id, result };
        let payload = serde_json::to_vec(&envelope)?;
        let msg = JobMessage::new(ServiceType::RetrieveMesh, self.requirements.clone(), vec![payload]);
        info!(%job_id, "job finished, returning result");
        self.send_job_message(msg).await
    }

    async fn send_job_message(&mut self, msg: JobMessage) -> Result<()> {
        let mut frames = msg.pack();
        let first = frames.remove(0);
        let mut multipart = ZmqMessage::from(first);
        for frame in frames {
            multipart.push_back(frame.into());
        }
        self.socket.send(multipart).await.map_err(WorkerError::Send)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remus_protocol::{ContentFormat, JobContent, MeshIOType};
    use std::collections::HashMap;

    fn sample_submission() -> JobSubmission {
        let mut payload = HashMap::new();
        payload.insert(
            remus_protocol::DEFAULT_PAYLOAD_KEY.to_string(),
            JobContent {
                format: ContentFormat::Text,
                bytes: b"TEST".to_vec(),
            },
        );
        JobSubmission {
            requirements: JobRequirements::new(MeshIOType::new("raw_edges", "mesh2d"), "tetgen", vec![]),
            payload,
        }
    }

    #[test]
    fn echo_handler_appends_greeting_and_reports_progress() {
        let handler = EchoHandler {
            step_delay: Duration::from_millis(0),
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = ProgressSink(tx);
        let job_id = JobId::generate();
        let result = handler.mesh(job_id, sample_submission(), sink).unwrap();
        match result {
            JobResult::Inline { bytes } => {
                assert_eq!(String::from_utf8(bytes).unwrap(), "TEST and Hello Client");
            }
            other => panic!("unexpected result variant: {other:?}"),
        }

        let mut reports = Vec::new();
        while let Ok(update) = rx.try_recv() {
            reports.push(update);
        }
        assert_eq!(reports.len(), 5);
        assert_eq!(reports[0].0, 20);
        assert_eq!(reports[4].0, 100);
    }
}
