//! The broker event loop: binds both ROUTER sockets and an optional PUB
//! socket, then polls them in a single-threaded cooperative loop.

use crate::active_jobs::ActiveJobs;
use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::events::{EventPayload, EventPublisher, Topic};
use crate::factory::WorkerFactory;
use crate::pool::WorkerPool;
use crate::queue::JobQueue;
use remus_protocol::{
    JobId, JobMessage, JobResponse, JobResponseBody, JobResult, JobSubmission,
    ResultEnvelope, ServiceType, StatusCode, StatusEnvelope,
};
use std::sync::mpsc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

/// Parse whatever frames a ROUTER recv produced (after the identity frame)
/// into a [`JobMessage`], accepting both the unified 5-frame form and the
/// legacy 3-frame form this protocol's predecessor used internally.
fn parse_job_message(frames: &[Vec<u8>]) -> remus_protocol::Result<JobMessage> {
    if frames.len() == 3 {
        JobMessage::parse_legacy_three_frame(frames)
    } else {
        JobMessage::unpack(frames)
    }
}

/// Strip the ROUTER-supplied routing identity (and, for peers still
/// emulating a REQ socket, the empty delimiter frame that follows it) from
/// a received multipart message.
fn split_identity(mut parts: Vec<Vec<u8>>) -> Option<(Vec<u8>, Vec<Vec<u8>>)> {
    if parts.is_empty() {
        return None;
    }
    let identity = parts.remove(0);
    if parts.first().map(|f| f.is_empty()).unwrap_or(false) {
        parts.remove(0);
    }
    Some((identity, parts))
}

/// The broker's full event loop.
pub struct Router {
    #[allow(dead_code)]
    context: zmq::Context,
    client_socket: zmq::Socket,
    worker_socket: zmq::Socket,
    publisher: EventPublisher,
    queue: JobQueue,
    pool: WorkerPool,
    active: ActiveJobs,
    factory: Box<dyn WorkerFactory>,
    config: BrokerConfig,
    running: bool,
}

impl Router {
    /// Bind both ROUTER sockets (and the PUB socket, if configured).
    pub fn bind(config: BrokerConfig, factory: Box<dyn WorkerFactory>) -> Result<Self> {
        let context = zmq::Context::new();

        let client_socket = context.socket(zmq::ROUTER).map_err(|source| BrokerError::Bind {
            socket: "client",
            addr: config.client_addr.clone(),
            source,
        })?;
        client_socket
            .bind(&config.client_addr)
            .map_err(|source| BrokerError::Bind {
                socket: "client",
                addr: config.client_addr.clone(),
                source,
            })?;
        client_socket.set_rcvtimeo(100).map_err(|source| BrokerError::Bind {
            socket: "client",
            addr: config.client_addr.clone(),
            source,
        })?;

        let worker_socket = context.socket(zmq::ROUTER).map_err(|source| BrokerError::Bind {
            socket: "worker",
            addr: config.worker_addr.clone(),
            source,
        })?;
        worker_socket
            .bind(&config.worker_addr)
            .map_err(|source| BrokerError::Bind {
                socket: "worker",
                addr: config.worker_addr.clone(),
                source,
            })?;
        worker_socket.set_rcvtimeo(100).map_err(|source| BrokerError::Bind {
            socket: "worker",
            addr: config.worker_addr.clone(),
            source,
        })?;

        let publisher = match &config.publish_addr {
            Some(addr) => EventPublisher::bind(&context, addr).map_err(|source| BrokerError::Bind {
                socket: "publish",
                addr: addr.clone(),
                source,
            })?,
            None => EventPublisher::disabled(),
        };

        info!(
            client_addr = %config.client_addr,
            worker_addr = %config.worker_addr,
            "broker bound"
        );

        Ok(Self {
            context,
            client_socket,
            worker_socket,
            publisher,
            queue: JobQueue::new(),
            pool: WorkerPool::new(),
            active: ActiveJobs::new(),
            factory,
            config,
            running: false,
        })
    }

    pub fn run(&mut self) -> Result<()> {
        self.run_with_shutdown_inner(None)
    }

    pub fn run_with_shutdown(&mut self, stop_rx: mpsc::Receiver<()>) -> Result<()> {
        self.run_with_shutdown_inner(Some(stop_rx))
    }

    fn run_with_shutdown_inner(&mut self, stop_rx: Option<mpsc::Receiver<()>>) -> Result<()> {
        self.running = true;
        info!("broker event loop started");

        while self.running {
            if let Some(rx) = stop_rx.as_ref() {
                match rx.try_recv() {
                    Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                        info!("broker received stop signal");
                        break;
                    }
                    Err(mpsc::TryRecvError::Empty) => {}
                }
            }

            self.poll_once()?;

            self.drain_client_frames();
            self.drain_worker_frames();
            self.liveness_sweep();
            self.dispatch();
        }

        self.publisher.publish(Topic::Stop, &EventPayload::Empty);
        info!("broker stopped");
        Ok(())
    }

    /// Wait for activity on either ROUTER socket, up to one heartbeat
    /// interval. Returning from this call (whether by wakeup or timeout) is
    /// the loop's sole suspension point.
    fn poll_once(&mut self) -> Result<()> {
        let mut items = [
            self.client_socket.as_poll_item(zmq::POLLIN),
            self.worker_socket.as_poll_item(zmq::POLLIN),
        ];
        zmq::poll(&mut items, self.config.heartbeat_interval_ms as i64).map_err(BrokerError::Poll)?;
        Ok(())
    }

    fn recv_all(socket: &zmq::Socket) -> Vec<Vec<Vec<u8>>> {
        let mut messages = Vec::new();
        loop {
            match socket.recv_multipart(zmq::DONTWAIT) {
                Ok(parts) => messages.push(parts),
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => {
                    warn!("recv error: {}", e);
                    break;
                }
            }
        }
        messages
    }

    fn drain_client_frames(&mut self) {
        for parts in Self::recv_all(&self.client_socket) {
            let Some((identity, frames)) = split_identity(parts) else {
                continue;
            };
            match parse_job_message(&frames) {
                Ok(msg) => self.handle_client_message(identity, msg),
                Err(e) => {
                    warn!("malformed client frame: {}", e);
                    self.reply_client(&identity, JobResponseBody::Invalid);
                }
            }
        }
    }

    fn drain_worker_frames(&mut self) {
        for parts in Self::recv_all(&self.worker_socket) {
            let Some((identity, frames)) = split_identity(parts) else {
                continue;
            };
            if frames.len() == 3 {
                debug!("accepted legacy 3-frame worker message");
            }
            match parse_job_message(&frames) {
                Ok(msg) => self.handle_worker_message(identity, msg),
                Err(e) => warn!("malformed worker frame: {}", e),
            }
        }
    }

    fn reply_client(&self, identity: &[u8], body: JobResponseBody) {
        self.send_response(&self.client_socket, "client", identity, body);
    }

    fn reply_worker(&self, identity: &[u8], body: JobResponseBody) {
        self.send_response(&self.worker_socket, "worker", identity, body);
    }

    fn send_response(&self, socket: &zmq::Socket, name: &'static str, identity: &[u8], body: JobResponseBody) {
        let response = JobResponse::new(body);
        let Ok(frames) = response.pack() else {
            warn!("failed to pack {} response", name);
            return;
        };
        if let Err(e) = socket.send(identity, zmq::SNDMORE) {
            warn!("failed to send {} routing frame: {}", name, e);
            return;
        }
        let last = frames.len().saturating_sub(1);
        for (i, frame) in frames.into_iter().enumerate() {
            let flags = if i < last { zmq::SNDMORE } else { 0 };
            if let Err(e) = socket.send(frame, flags) {
                warn!("failed to send {} body frame: {}", name, e);
                return;
            }
        }
    }

    fn handle_client_message(&mut self, identity: Vec<u8>, msg: JobMessage) {
        let Ok(service) = msg.service_type() else {
            self.reply_client(&identity, JobResponseBody::Invalid);
            return;
        };
        let requirements = msg.requirements();

        match service {
            ServiceType::CanMesh => {
                let can = self.pool.have_idle_for(&requirements) || self.factory.can_launch(&requirements);
                self.reply_client(&identity, JobResponseBody::Capability { can_mesh: can });
            }
            ServiceType::MakeMesh => {
                let Some(payload_frame) = msg.payload_frames.first() else {
                    self.reply_client(&identity, JobResponseBody::Invalid);
                    return;
                };
                let submission: Result<JobSubmission, _> = serde_json::from_slice(payload_frame);
                match submission {
                    Ok(submission) => {
                        let job_id = JobId::generate();
                        self.queue.add_job(job_id, requirements, submission);
                        self.publisher.publish(Topic::JobQueued, &EventPayload::Job { job_id });
                        self.reply_client(&identity, JobResponseBody::Accepted { job_id });
                    }
                    Err(e) => {
                        warn!("malformed job submission: {}", e);
                        self.reply_client(&identity, JobResponseBody::Invalid);
                    }
                }
            }
            ServiceType::MeshStatus => {
                self.reply_client(&identity, self.status_response(&msg));
            }
            ServiceType::RetrieveMesh => {
                let body = self.retrieve_response(&msg);
                self.reply_client(&identity, body);
            }
            ServiceType::TerminateJob => {
                self.terminate_job(&msg);
                self.reply_client(&identity, JobResponseBody::Accepted { job_id: job_id_of(&msg) });
            }
            ServiceType::Heartbeat | ServiceType::Shutdown => {
                self.reply_client(&identity, JobResponseBody::Invalid);
            }
        }
    }

    fn status_response(&self, msg: &JobMessage) -> JobResponseBody {
        let Some(id) = parse_job_id(msg) else {
            return JobResponseBody::Invalid;
        };
        if let Some(status) = self.active.status(id) {
            return JobResponseBody::Status(status.clone());
        }
        if self.queue.have_id(id) {
            return JobResponseBody::Status(StatusEnvelope::new(id, StatusCode::Queued, 0, ""));
        }
        JobResponseBody::Invalid
    }

    fn retrieve_response(&mut self, msg: &JobMessage) -> JobResponseBody {
        let Some(id) = parse_job_id(msg) else {
            return JobResponseBody::Invalid;
        };
        if self.active.have_result(id) {
            let result = self.active.remove(id).and_then(|job| job.result);
            return match result {
                Some(result) => JobResponseBody::Result(ResultEnvelope { job_id: id, result }),
                None => JobResponseBody::Invalid,
            };
        }
        if let Some(status) = self.active.status(id).cloned() {
            // A terminal job with no stored result (e.g. FAILED after a
            // dead worker) is still destroyed on RETRIEVE_MESH, matching
            // the data model's "destroyed on explicit RETRIEVE_MESH" rule;
            // a job still in flight (QUEUED/IN_PROGRESS) is left in place
            // so the client can poll it again.
            if status.status.is_terminal() {
                self.active.remove(id);
            }
            return JobResponseBody::Status(status);
        }
        if self.queue.have_id(id) {
            return JobResponseBody::Status(StatusEnvelope::new(id, StatusCode::Queued, 0, ""));
        }
        JobResponseBody::Invalid
    }

    fn terminate_job(&mut self, msg: &JobMessage) {
        let Some(id) = parse_job_id(msg) else {
            return;
        };
        if self.queue.remove_by_id(id).is_some() {
            return;
        }
        if let Some(address) = self.active.worker_of(id).map(|a| a.to_vec()) {
            self.active
                .update_status(id, StatusEnvelope::new(id, StatusCode::Failed, 0, "terminated by client"));
            self.reply_worker(&address, JobResponseBody::Status(StatusEnvelope::new(id, StatusCode::Failed, 0, "ABORT")));
            self.publisher.publish(Topic::JobFailed, &EventPayload::Job { job_id: id });
        }
    }

    fn handle_worker_message(&mut self, identity: Vec<u8>, msg: JobMessage) {
        let Ok(service) = msg.service_type() else {
            return;
        };
        let requirements = msg.requirements();

        match service {
            ServiceType::CanMesh => {
                self.pool.add_worker(identity.clone(), requirements, self.config.heartbeat_interval_ms);
                self.active.refresh_for_worker(&identity, self.config.heartbeat_interval_ms);
                self.publisher.publish(
                    Topic::WorkerRegistered,
                    &EventPayload::Worker { address_hex: hex_encode(&identity) },
                );
            }
            ServiceType::MakeMesh => {
                // A worker's MAKE_MESH is "I am idle and asking for work",
                // not a job submission; add it to the pool if this is its
                // first contact (it carries its requirements triple same as
                // CAN_MESH), otherwise just mark it ready again.
                self.pool.add_worker(identity.clone(), requirements, self.config.heartbeat_interval_ms);
                self.active.refresh_for_worker(&identity, self.config.heartbeat_interval_ms);
                self.publisher.publish(
                    Topic::WorkerAskingForJob,
                    &EventPayload::Worker { address_hex: hex_encode(&identity) },
                );
            }
            ServiceType::MeshStatus => {
                if let Some((id, status)) = parse_status_payload(&msg) {
                    if self.active.update_status(id, status.clone()) {
                        self.publisher.publish(Topic::JobStatusChanged, &EventPayload::Job { job_id: id });
                        if status.status == StatusCode::Finished {
                            self.publisher.publish(Topic::JobFinished, &EventPayload::Job { job_id: id });
                        } else if status.status == StatusCode::Failed {
                            self.publisher.publish(Topic::JobFailed, &EventPayload::Job { job_id: id });
                        }
                    } else {
                        debug!("dropped status regression for job {}", id);
                    }
                }
                self.active.refresh_for_worker(&identity, self.config.heartbeat_interval_ms);
                self.pool.refresh(&identity, self.config.heartbeat_interval_ms);
            }
            ServiceType::RetrieveMesh => {
                if let Some((id, result)) = parse_result_payload(&msg) {
                    if self.active.update_result(id, result) {
                        self.publisher.publish(Topic::JobFinished, &EventPayload::Job { job_id: id });
                    } else {
                        debug!("dropped result for unknown or already-terminal job");
                    }
                }
                self.pool.mark_ready(&identity);
                self.active.refresh_for_worker(&identity, self.config.heartbeat_interval_ms);
            }
            ServiceType::Heartbeat => {
                self.pool.refresh(&identity, self.config.heartbeat_interval_ms);
                self.active.refresh_for_worker(&identity, self.config.heartbeat_interval_ms);
            }
            ServiceType::Shutdown => {
                self.pool.remove(&identity);
                self.publisher.publish(
                    Topic::WorkerTerminated,
                    &EventPayload::Worker { address_hex: hex_encode(&identity) },
                );
            }
            ServiceType::TerminateJob => {}
        }
    }

    fn liveness_sweep(&mut self) {
        let now = current_time();
        let dead = self.pool.sweep(now);
        for worker in dead {
            warn!(address = %hex_encode(&worker.address), "worker declared dead by liveness sweep");
            let failed = self.active.fail_owned_by(&worker.address, "worker became unresponsive");
            for job_id in failed {
                self.publisher.publish(Topic::JobFailed, &EventPayload::Job { job_id });
            }
            self.publisher.publish(
                Topic::WorkerHeartbeatFailed,
                &EventPayload::Worker { address_hex: hex_encode(&worker.address) },
            );
        }
        let expired = self.active.mark_failed_expired(now);
        for job_id in expired {
            self.publisher.publish(Topic::JobFailed, &EventPayload::Job { job_id });
        }
    }

    /// For each requirement class with at least one waiting job: pair it
    /// with an idle matching worker if one exists, else ask the factory to
    /// launch one.
    fn dispatch(&mut self) {
        self.factory.update_counts();
        for requirements in self.queue.waiting_requirements() {
            while self.pool.have_idle_for(&requirements) {
                let Some(queued) = self.queue.take_job(&requirements) else {
                    break;
                };
                let Some(address) = self.pool.take_idle(&requirements, queued.id) else {
                    break;
                };
                self.assign(queued, address);
            }
            if self.queue.get_bucket_len(&requirements) > 0 && self.factory.can_launch(&requirements) {
                if self.factory.launch(&requirements) {
                    debug!("factory launched a worker for a waiting requirement class");
                }
            }
        }
    }

    fn assign(&mut self, job: crate::queue::QueuedJob, worker_address: Vec<u8>) {
        let expiry = current_time() + self.config.heartbeat_interval_ms as f64 / 1000.0;
        self.active.add(job.id, worker_address.clone(), expiry);
        self.active
            .update_status(job.id, StatusEnvelope::new(job.id, StatusCode::InProgress, 0, ""));

        let Ok(payload) = serde_json::to_vec(&job.submission) else {
            warn!("failed to serialize job submission for dispatch");
            return;
        };
        // The id frame comes first so the worker can tag its MESH_STATUS and
        // RETRIEVE_MESH replies with the same id this broker is tracking the
        // job under; a worker has no other way to learn its broker-assigned id.
        let id_frame = job.id.to_string().into_bytes();
        let dispatch_msg = JobMessage::new(ServiceType::MakeMesh, job.requirements, vec![id_frame, payload]);
        let frames = dispatch_msg.pack();
        if let Err(e) = self.worker_socket.send(worker_address.clone(), zmq::SNDMORE) {
            warn!("failed to send dispatch routing frame: {}", e);
            return;
        }
        let last = frames.len().saturating_sub(1);
        for (i, frame) in frames.into_iter().enumerate() {
            let flags = if i < last { zmq::SNDMORE } else { 0 };
            if let Err(e) = self.worker_socket.send(frame, flags) {
                warn!("failed to send dispatch body frame: {}", e);
                return;
            }
        }
        self.publisher.publish(Topic::JobAssignedToWorker, &EventPayload::Job { job_id: job.id });
    }

    pub fn stop(&mut self) {
        self.running = false;
    }
}

fn parse_job_id(msg: &JobMessage) -> Option<JobId> {
    let frame = msg.payload_frames.first()?;
    let text = std::str::from_utf8(frame).ok()?;
    text.trim_matches('"').parse().ok()
}

fn parse_status_payload(msg: &JobMessage) -> Option<(JobId, StatusEnvelope)> {
    let frame = msg.payload_frames.first()?;
    let status: StatusEnvelope = serde_json::from_slice(frame).ok()?;
    Some((status.job_id, status))
}

fn parse_result_payload(msg: &JobMessage) -> Option<(JobId, JobResult)> {
    let frame = msg.payload_frames.first()?;
    let envelope: ResultEnvelope = serde_json::from_slice(frame).ok()?;
    Some((envelope.job_id, envelope.result))
}

fn job_id_of(msg: &JobMessage) -> JobId {
    parse_job_id(msg).unwrap_or_else(JobId::generate)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
