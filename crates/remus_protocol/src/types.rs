//! Domain types shared by client, worker, and broker.
//!
//! These are the values carried inside [`crate::JobMessage`]/[`crate::JobResponse`]
//! payload frames, plus the matching keys the broker uses to pair jobs with
//! workers.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// The key every [`JobSubmission`] payload map is guaranteed to carry.
pub const DEFAULT_PAYLOAD_KEY: &str = "data";

// ============================================================================
// MeshIOType / JobRequirements
// ============================================================================

/// A named (input, output) mesh-transformation category.
///
/// Equality is pair-wise on names; the registry of valid names is external
/// to this crate (any UTF-8 string the embedder's workers agree on).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshIOType {
    pub input: String,
    pub output: String,
}

impl MeshIOType {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for MeshIOType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.input, self.output)
    }
}

/// The matching key for dispatch: a [`MeshIOType`] plus the worker name and
/// an opaque requirement blob. Two workers advertising the same triple are
/// interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRequirements {
    pub io_type: MeshIOType,
    pub worker_name: String,
    pub requirement_blob: Vec<u8>,
}

impl JobRequirements {
    pub fn new(
        io_type: MeshIOType,
        worker_name: impl Into<String>,
        requirement_blob: Vec<u8>,
    ) -> Self {
        Self {
            io_type,
            worker_name: worker_name.into(),
            requirement_blob,
        }
    }
}

// ============================================================================
// JobId
// ============================================================================

/// A 128-bit universally-unique identifier assigned by the broker at queue
/// time. Printable as its canonical textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh, broker-assigned job id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl From<Uuid> for JobId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

// ============================================================================
// JobContent / JobSubmission
// ============================================================================

/// Tag describing how [`JobContent::bytes`] should be interpreted by the
/// worker. The broker never inspects the bytes themselves — only the tag is
/// load-bearing for routing, and even that is purely informational.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentFormat {
    Raw,
    Json,
    Text,
}

/// A single named blob within a [`JobSubmission`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobContent {
    pub format: ContentFormat,
    pub bytes: Vec<u8>,
}

impl JobContent {
    pub fn text(s: impl Into<String>) -> Self {
        Self {
            format: ContentFormat::Text,
            bytes: s.into().into_bytes(),
        }
    }

    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            format: ContentFormat::Raw,
            bytes,
        }
    }
}

/// A client's payload plus the requirements it expects to be satisfied.
/// The payload map always contains at least [`DEFAULT_PAYLOAD_KEY`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub requirements: JobRequirements,
    pub payload: HashMap<String, JobContent>,
}

impl JobSubmission {
    /// Build a submission whose payload map holds only the default key.
    pub fn single(requirements: JobRequirements, content: JobContent) -> Self {
        let mut payload = HashMap::with_capacity(1);
        payload.insert(DEFAULT_PAYLOAD_KEY.to_string(), content);
        Self {
            requirements,
            payload,
        }
    }

    pub fn default_content(&self) -> Option<&JobContent> {
        self.payload.get(DEFAULT_PAYLOAD_KEY)
    }
}

// ============================================================================
// Status / result envelopes
// ============================================================================

/// Status code enum, numbered exactly as the wire protocol specifies.
///
/// Monotonicity (see [`crate::JobStatus::update`] callers in `remus_broker`)
/// compares the raw numeric discriminant: a status update is accepted only
/// if its code is >= the code already stored. `FAILED` (4) therefore still
/// outranks `FINISHED` (3) — a worker that reports FINISHED and then, on a
/// separate stale connection, reports FAILED for the same job, is believed;
/// the broker never sees that ordering in practice since a worker reports
/// exactly one terminal status per job, but the comparison is defined this
/// literally so it has no special cases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Invalid = 0,
    Queued = 1,
    InProgress = 2,
    Finished = 3,
    Failed = 4,
    Expired = 5,
}

impl StatusCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, StatusCode::Finished | StatusCode::Failed | StatusCode::Expired)
    }
}

/// `(JobId, statusCode, progressValue, progressMessage)`.
///
/// `progress` is in `1..=100` while `status == IN_PROGRESS`, else `0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub job_id: JobId,
    pub status: StatusCode,
    pub progress: u8,
    pub message: String,
}

impl StatusEnvelope {
    pub fn new(job_id: JobId, status: StatusCode, progress: u8, message: impl Into<String>) -> Self {
        let progress = if status == StatusCode::InProgress {
            progress.clamp(1, 100)
        } else {
            0
        };
        Self {
            job_id,
            status,
            progress,
            message: message.into(),
        }
    }
}

/// `(JobId, FileHandle or inlineBytes)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobResult {
    FileHandle { path: String },
    Inline { bytes: Vec<u8> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub job_id: JobId,
    pub result: JobResult,
}

// ============================================================================
// Worker-side handshake payloads
// ============================================================================

/// Payload for a worker's CAN_MESH registration: "I can satisfy this
/// requirements triple." The requirements triple itself rides in frames 2-4
/// of the enclosing [`crate::JobMessage`]; this payload carries nothing
/// beyond an optional stable worker id, mirroring the identify handshake of
/// this protocol's nearest sibling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrips_through_display_and_parse() {
        let id = JobId::generate();
        let text = id.to_string();
        let parsed: JobId = text.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn status_code_numeric_order_matches_wire_values() {
        assert!(StatusCode::Queued < StatusCode::InProgress);
        assert!(StatusCode::InProgress < StatusCode::Finished);
        assert!(StatusCode::Finished < StatusCode::Failed);
        assert!(StatusCode::Failed < StatusCode::Expired);
    }

    #[test]
    fn job_submission_always_carries_default_key() {
        let reqs = JobRequirements::new(MeshIOType::new("raw_edges", "mesh2d"), "tetgen", vec![]);
        let submission = JobSubmission::single(reqs, JobContent::text("TEST"));
        assert!(submission.default_content().is_some());
    }
}
