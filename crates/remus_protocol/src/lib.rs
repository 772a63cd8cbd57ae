//! Remus wire protocol: the frame layout client, worker, and broker speak.
//!
//! # Protocol Specification
//!
//! `JobMessage` (client->broker and worker->broker) is a multipart message:
//!
//! ```text
//! [0: "REMUS" + version][1: service type][2: MeshIOType][3: worker name][4: requirement blob][5..: payload]
//! ```
//!
//! `JobResponse` (broker->client and broker->worker) is the routing identity
//! (stripped by the ROUTER socket itself, so it never appears in these
//! frames) followed by body frames using the same payload encoding.
//!
//! This crate also accepts one legacy shape: a bare 3-frame
//! `[mesh type code, service type, data]` message with no routing metadata
//! or requirement blob, the predecessor format this protocol unifies (see
//! `SPEC_FULL.md` §4.1 and §9). Only [`JobMessage::parse_legacy_three_frame`]
//! understands it; everything this workspace emits uses the 5-frame form.

pub mod error;
pub mod factory;
pub mod types;

pub use error::{ProtocolError, Result};
pub use factory::WorkerFactory;
pub use types::*;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Protocol tag frame 0 always starts with.
pub const PROTOCOL_TAG: &[u8; 5] = b"REMUS";

/// Protocol version byte, appended to `PROTOCOL_TAG` in frame 0.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default client-facing ROUTER port.
pub const DEFAULT_CLIENT_PORT: u16 = 50505;
/// Default worker-facing ROUTER port.
pub const DEFAULT_WORKER_PORT: u16 = 50510;
/// Default telemetry PUB port.
pub const DEFAULT_PUBLISH_PORT: u16 = 50515;

/// Nominal heartbeat interval, in milliseconds. Workers that go silent for
/// longer than this are declared dead by the liveness sweep.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;

/// Service type, frame 1 of a [`JobMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServiceType {
    MakeMesh = 1,
    MeshStatus = 2,
    CanMesh = 3,
    RetrieveMesh = 4,
    Heartbeat = 5,
    Shutdown = 6,
    TerminateJob = 7,
}

impl ServiceType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ServiceType::MakeMesh),
            2 => Ok(ServiceType::MeshStatus),
            3 => Ok(ServiceType::CanMesh),
            4 => Ok(ServiceType::RetrieveMesh),
            5 => Ok(ServiceType::Heartbeat),
            6 => Ok(ServiceType::Shutdown),
            7 => Ok(ServiceType::TerminateJob),
            other => Err(ProtocolError::UnknownService(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

fn write_lp_string(buf: &mut Vec<u8>, s: &str) {
    buf.write_u32::<BigEndian>(s.len() as u32)
        .expect("writes to a Vec never fail");
    buf.extend_from_slice(s.as_bytes());
}

fn read_lp_string(cursor: &mut Cursor<&[u8]>, field: &'static str) -> Result<String> {
    let len = cursor
        .read_u32::<BigEndian>()
        .map_err(|_| ProtocolError::BadLengthPrefix(field))? as usize;
    let start = cursor.position() as usize;
    let data = cursor.get_ref();
    let end = start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or(ProtocolError::BadLengthPrefix(field))?;
    let s = std::str::from_utf8(&data[start..end])
        .map_err(|_| ProtocolError::BadLengthPrefix(field))?
        .to_string();
    cursor.set_position(end as u64);
    Ok(s)
}

/// Pack a [`MeshIOType`] into a single frame: two length-prefixed UTF-8
/// strings, input then output.
pub fn pack_mesh_io_type(io_type: &MeshIOType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + io_type.input.len() + io_type.output.len());
    write_lp_string(&mut buf, &io_type.input);
    write_lp_string(&mut buf, &io_type.output);
    buf
}

/// Unpack a [`MeshIOType`] frame produced by [`pack_mesh_io_type`].
pub fn unpack_mesh_io_type(frame: &[u8]) -> Result<MeshIOType> {
    let mut cursor = Cursor::new(frame);
    let input = read_lp_string(&mut cursor, "mesh_io_type.input")?;
    let output = read_lp_string(&mut cursor, "mesh_io_type.output")?;
    Ok(MeshIOType::new(input, output))
}

/// A parsed `JobMessage`: header plus the requirements triple plus any
/// payload frames (submission map, status object, result, or id, depending
/// on the service type — the codec does not interpret payload frames, only
/// carries them; callers decode with `serde_json` using the type that
/// matches `service`).
#[derive(Debug, Clone)]
pub struct JobMessage {
    pub version: u8,
    pub service: u8,
    pub io_type: MeshIOType,
    pub worker_name: String,
    pub requirement_blob: Vec<u8>,
    pub payload_frames: Vec<Vec<u8>>,
}

impl JobMessage {
    /// Build a new message for the unified 5-frame wire form.
    pub fn new(
        service: ServiceType,
        requirements: JobRequirements,
        payload_frames: Vec<Vec<u8>>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            service: service.as_u8(),
            io_type: requirements.io_type,
            worker_name: requirements.worker_name,
            requirement_blob: requirements.requirement_blob,
            payload_frames,
        }
    }

    pub fn service_type(&self) -> Result<ServiceType> {
        ServiceType::from_u8(self.service)
    }

    pub fn requirements(&self) -> JobRequirements {
        JobRequirements::new(
            self.io_type.clone(),
            self.worker_name.clone(),
            self.requirement_blob.clone(),
        )
    }

    /// Pack into the wire frames a ROUTER/DEALER send call expects, in
    /// order, *not* including the routing identity frame.
    pub fn pack(&self) -> Vec<Vec<u8>> {
        let mut tag = Vec::with_capacity(6);
        tag.extend_from_slice(PROTOCOL_TAG);
        tag.push(self.version);

        let mut frames = vec![
            tag,
            vec![self.service],
            pack_mesh_io_type(&self.io_type),
            self.worker_name.clone().into_bytes(),
            self.requirement_blob.clone(),
        ];
        frames.extend(self.payload_frames.iter().cloned());
        frames
    }

    /// Parse the unified 5-frame form (plus zero or more payload frames).
    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() < 5 {
            return Err(ProtocolError::TooFewFrames {
                expected: 5,
                got: frames.len(),
            });
        }

        let tag_frame = &frames[0];
        if tag_frame.len() != 6 || &tag_frame[0..5] != PROTOCOL_TAG {
            return Err(ProtocolError::BadTag(tag_frame.clone()));
        }
        let version = tag_frame[5];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let service = *frames[1]
            .first()
            .ok_or(ProtocolError::BadLengthPrefix("service_type"))?;
        // Validate the service type eagerly so malformed frames are rejected
        // at the codec boundary rather than surfacing deep in the router.
        ServiceType::from_u8(service)?;

        let io_type = unpack_mesh_io_type(&frames[2])?;
        let worker_name = String::from_utf8(frames[3].clone())
            .map_err(|_| ProtocolError::BadLengthPrefix("worker_name"))?;
        let requirement_blob = frames[4].clone();
        let payload_frames = frames[5..].to_vec();

        Ok(Self {
            version,
            service,
            io_type,
            worker_name,
            requirement_blob,
            payload_frames,
        })
    }

    /// Parse the legacy 3-frame internal shape: `[mesh type code, service
    /// type, data]`. There is no routing metadata, no worker name, and no
    /// requirement blob in this form; the mesh type code is resolved
    /// through [`legacy_mesh_io_type`] and the worker name/requirement blob
    /// are left empty, matching a pool that advertises by I/O type alone.
    pub fn parse_legacy_three_frame(frames: &[Vec<u8>]) -> Result<Self> {
        if frames.len() != 3 {
            return Err(ProtocolError::TooFewFrames {
                expected: 3,
                got: frames.len(),
            });
        }
        let mesh_type_code = *frames[0]
            .first()
            .ok_or(ProtocolError::BadLengthPrefix("legacy_mesh_type"))?;
        let service = *frames[1]
            .first()
            .ok_or(ProtocolError::BadLengthPrefix("legacy_service_type"))?;
        ServiceType::from_u8(service)?;
        let io_type = legacy_mesh_io_type(mesh_type_code);

        Ok(Self {
            version: PROTOCOL_VERSION,
            service,
            io_type,
            worker_name: String::new(),
            requirement_blob: Vec::new(),
            payload_frames: vec![frames[2].clone()],
        })
    }
}

/// The legacy format identified mesh categories by a small integer code
/// rather than a named pair. `0` and unrecognized codes map to an empty
/// input type, matching the original's untyped "2D"/"3D" output-only
/// categories (see `examples/original_source/Common/meshServerGlobals.h`).
pub fn legacy_mesh_io_type(code: u8) -> MeshIOType {
    match code {
        1 => MeshIOType::new("", "2DMESH"),
        2 => MeshIOType::new("", "3DMESH"),
        _ => MeshIOType::new("", "UNKNOWN"),
    }
}

/// `JobResponse` body: one JSON frame tagged by kind, matching the
/// "identical payload encoding" directive in the wire spec (the payload
/// encoding used is JSON, as for `JobMessage` payload frames).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobResponseBody {
    /// Reply to MAKE_MESH: the newly-assigned job id.
    Accepted { job_id: JobId },
    /// Reply to MESH_STATUS or a RETRIEVE_MESH with no result yet.
    Status(StatusEnvelope),
    /// Reply to RETRIEVE_MESH once a result is stored.
    Result(ResultEnvelope),
    /// Reply to CAN_MESH.
    Capability { can_mesh: bool },
    /// Reply to a malformed or unrecognized request.
    Invalid,
}

/// A `JobResponse`: routing identity (carried out-of-band by the ROUTER
/// send, not part of `frames`) plus body frames.
#[derive(Debug, Clone)]
pub struct JobResponse {
    pub body: JobResponseBody,
}

impl JobResponse {
    pub fn new(body: JobResponseBody) -> Self {
        Self { body }
    }

    pub fn pack(&self) -> Result<Vec<Vec<u8>>> {
        Ok(vec![serde_json::to_vec(&self.body)?])
    }

    pub fn unpack(frames: &[Vec<u8>]) -> Result<Self> {
        let body_frame = frames
            .first()
            .ok_or(ProtocolError::TooFewFrames { expected: 1, got: 0 })?;
        let body = serde_json::from_slice(body_frame)?;
        Ok(Self { body })
    }
}
