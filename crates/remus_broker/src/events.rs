//! Fire-and-forget telemetry fan-out over an optional ZMQ PUB socket.

use remus_protocol::JobId;
use serde::Serialize;

/// Topic prefixes subscribers filter on via ZMQ PUB/SUB prefix matching.
/// The topic frame is sent first (and separately from the JSON payload
/// frame) so a subscriber's `set_subscribe` works without inspecting the
/// payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    WorkerRegistered,
    WorkerAskingForJob,
    WorkerTerminated,
    WorkerHeartbeatFailed,
    JobQueued,
    JobAssignedToWorker,
    JobStatusChanged,
    JobFinished,
    JobFailed,
    Stop,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::WorkerRegistered => "worker:REGISTERED",
            Topic::WorkerAskingForJob => "worker:ASKING_FOR_JOB",
            Topic::WorkerTerminated => "worker:TERMINATED",
            Topic::WorkerHeartbeatFailed => "worker:HEARTBEAT_FAILED",
            Topic::JobQueued => "job:QUEUED",
            Topic::JobAssignedToWorker => "job:ASSIGNED_TO_WORKER",
            Topic::JobStatusChanged => "job:STATUS_CHANGED",
            Topic::JobFinished => "job:FINISHED",
            Topic::JobFailed => "job:FAILED",
            Topic::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum EventPayload {
    Worker { address_hex: String },
    Job { job_id: JobId },
    Empty,
}

/// Wraps an optional PUB socket. Construction without a bind address yields
/// a publisher that silently drops every event, so the router core never
/// needs to branch on whether telemetry is configured.
pub struct EventPublisher {
    socket: Option<zmq::Socket>,
}

impl EventPublisher {
    pub fn disabled() -> Self {
        Self { socket: None }
    }

    pub fn bind(context: &zmq::Context, addr: &str) -> Result<Self, zmq::Error> {
        let socket = context.socket(zmq::PUB)?;
        socket.bind(addr)?;
        Ok(Self { socket: Some(socket) })
    }

    /// Publish one event. Never blocks: PUB sockets drop to slow or absent
    /// subscribers rather than back-pressure the sender, which is exactly
    /// the loss-tolerant semantics wanted here.
    pub fn publish(&self, topic: Topic, payload: &EventPayload) {
        let Some(socket) = self.socket.as_ref() else {
            return;
        };
        let Ok(body) = serde_json::to_vec(payload) else {
            return;
        };
        let _ = socket.send(topic.as_str(), zmq::SNDMORE | zmq::DONTWAIT);
        let _ = socket.send(body, zmq::DONTWAIT);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_publisher_does_not_panic() {
        let publisher = EventPublisher::disabled();
        publisher.publish(Topic::JobQueued, &EventPayload::Empty);
    }
}
