//! The set of connected workers: liveness, advertised requirements, and
//! idle/busy state.

use remus_protocol::{JobId, JobRequirements};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Busy,
}

/// A connected worker, addressed by its ZMQ routing identity.
#[derive(Debug, Clone)]
pub struct Worker {
    pub address: Vec<u8>,
    pub requirements: JobRequirements,
    pub state: WorkerState,
    pub expiry: f64,
    pub current_job: Option<JobId>,
    pub registered_at: f64,
}

/// Workers indexed by address, with a secondary FIFO-by-registration index
/// per requirement class for fast idle lookup.
#[derive(Default)]
pub struct WorkerPool {
    workers: HashMap<Vec<u8>, Worker>,
    idle_by_requirements: HashMap<JobRequirements, VecDeque<Vec<u8>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn get(&self, address: &[u8]) -> Option<&Worker> {
        self.workers.get(address)
    }

    /// Register or re-register a worker as IDLE, refreshing its liveness
    /// lease. A freshly-registered worker gets `2 * heartbeat_interval`
    /// before it's declared dead; a re-registration is treated the same as
    /// any other liveness-refreshing message.
    pub fn add_worker(&mut self, address: Vec<u8>, requirements: JobRequirements, heartbeat_interval_ms: u64) {
        let now = current_time();
        let grace = 2.0 * heartbeat_interval_ms as f64 / 1000.0;
        match self.workers.get_mut(&address) {
            Some(worker) => {
                worker.requirements = requirements;
                worker.expiry = now + grace;
                worker.state = WorkerState::Idle;
                worker.current_job = None;
            }
            None => {
                self.workers.insert(
                    address.clone(),
                    Worker {
                        address: address.clone(),
                        requirements: requirements.clone(),
                        state: WorkerState::Idle,
                        expiry: now + grace,
                        current_job: None,
                        registered_at: now,
                    },
                );
            }
        }
        self.mark_idle_index(&address, &requirements);
    }

    fn mark_idle_index(&mut self, address: &[u8], requirements: &JobRequirements) {
        let bucket = self.idle_by_requirements.entry(requirements.clone()).or_default();
        if !bucket.iter().any(|a| a == address) {
            bucket.push_back(address.to_vec());
        }
    }

    /// Mark a worker ready for dispatch (idempotent): used both by explicit
    /// registration and by a worker's MAKE_MESH "I am idle" signal.
    pub fn mark_ready(&mut self, address: &[u8]) {
        if let Some(worker) = self.workers.get_mut(address) {
            worker.state = WorkerState::Idle;
            worker.current_job = None;
            let requirements = worker.requirements.clone();
            self.mark_idle_index(address, &requirements);
        }
    }

    pub fn have_idle_for(&self, requirements: &JobRequirements) -> bool {
        self.idle_by_requirements
            .get(requirements)
            .map(|bucket| !bucket.is_empty())
            .unwrap_or(false)
    }

    /// Pop the earliest-registered idle worker advertising `requirements`
    /// and mark it BUSY.
    pub fn take_idle(&mut self, requirements: &JobRequirements, job_id: JobId) -> Option<Vec<u8>> {
        let bucket = self.idle_by_requirements.get_mut(requirements)?;
        while let Some(address) = bucket.pop_front() {
            if let Some(worker) = self.workers.get_mut(&address) {
                if worker.state == WorkerState::Idle {
                    worker.state = WorkerState::Busy;
                    worker.current_job = Some(job_id);
                    return Some(address);
                }
            }
        }
        None
    }

    /// Refresh a worker's liveness lease to `1 * heartbeat_interval` past
    /// now, as any message from it does.
    pub fn refresh(&mut self, address: &[u8], heartbeat_interval_ms: u64) {
        if let Some(worker) = self.workers.get_mut(address) {
            worker.expiry = current_time() + heartbeat_interval_ms as f64 / 1000.0;
        }
    }

    pub fn remove(&mut self, address: &[u8]) -> Option<Worker> {
        let worker = self.workers.remove(address)?;
        if let Some(bucket) = self.idle_by_requirements.get_mut(&worker.requirements) {
            bucket.retain(|a| a != address);
        }
        Some(worker)
    }

    /// Declare dead every worker whose expiry is in the past, returning
    /// them so the caller can fail their in-flight jobs and emit events.
    pub fn sweep(&mut self, now: f64) -> Vec<Worker> {
        let dead_addresses: Vec<Vec<u8>> = self
            .workers
            .values()
            .filter(|w| w.expiry < now)
            .map(|w| w.address.clone())
            .collect();
        dead_addresses
            .into_iter()
            .filter_map(|addr| self.remove(&addr))
            .collect()
    }
}
