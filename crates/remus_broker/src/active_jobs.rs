//! Jobs assigned to a worker but not yet retrieved by the client.

use remus_protocol::{JobId, JobResult, StatusCode, StatusEnvelope};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

/// A job that has been paired with a worker.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub id: JobId,
    pub worker_address: Vec<u8>,
    pub last_status: StatusEnvelope,
    pub result: Option<JobResult>,
    /// Tracks the owning worker's liveness window; refreshed by
    /// [`ActiveJobs::refresh_for_worker`] whenever that worker speaks.
    pub expiry: f64,
}

impl ActiveJob {
    pub fn have_result(&self) -> bool {
        self.result.is_some()
    }
}

/// Active jobs indexed by id, plus a reverse index by worker address so a
/// dead worker's jobs can be found without a full scan.
#[derive(Default)]
pub struct ActiveJobs {
    jobs: HashMap<JobId, ActiveJob>,
    by_worker: HashMap<Vec<u8>, Vec<JobId>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn have(&self, id: JobId) -> bool {
        self.jobs.contains_key(&id)
    }

    pub fn add(&mut self, id: JobId, worker_address: Vec<u8>, expiry: f64) {
        self.by_worker.entry(worker_address.clone()).or_default().push(id);
        self.jobs.insert(
            id,
            ActiveJob {
                id,
                worker_address,
                last_status: StatusEnvelope::new(id, StatusCode::InProgress, 0, ""),
                result: None,
                expiry,
            },
        );
    }

    pub fn status(&self, id: JobId) -> Option<&StatusEnvelope> {
        self.jobs.get(&id).map(|job| &job.last_status)
    }

    pub fn result(&self, id: JobId) -> Option<&JobResult> {
        self.jobs.get(&id).and_then(|job| job.result.as_ref())
    }

    pub fn have_result(&self, id: JobId) -> bool {
        self.jobs.get(&id).map(|job| job.have_result()).unwrap_or(false)
    }

    pub fn worker_of(&self, id: JobId) -> Option<&[u8]> {
        self.jobs.get(&id).map(|job| job.worker_address.as_slice())
    }

    /// Apply a status update under the monotonicity rule: a lower numeric
    /// status never overwrites a higher one. Returns `true` if the update
    /// was applied, `false` if it was a regression and silently dropped.
    pub fn update_status(&mut self, id: JobId, status: StatusEnvelope) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) => {
                if status.status >= job.last_status.status {
                    job.last_status = status;
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Store a result and force the status to FINISHED, maintaining the
    /// invariant `have_result(id) ⇒ status == FINISHED`. A result arriving
    /// for a job already marked FAILED or EXPIRED is a late straggler from a
    /// worker that kept working after being declared dead or aborted — it is
    /// dropped, the same as a late status regression, rather than stored
    /// alongside a non-FINISHED status.
    pub fn update_result(&mut self, id: JobId, result: JobResult) -> bool {
        match self.jobs.get_mut(&id) {
            Some(job) => {
                if job.last_status.status.is_terminal() && job.last_status.status != StatusCode::Finished {
                    return false;
                }
                job.result = Some(result);
                if job.last_status.status < StatusCode::Finished {
                    job.last_status.status = StatusCode::Finished;
                    job.last_status.progress = 0;
                }
                true
            }
            None => false,
        }
    }

    /// Refresh the expiry of every active job owned by `address`, called
    /// whenever that worker sends any message.
    pub fn refresh_for_worker(&mut self, address: &[u8], heartbeat_interval_ms: u64) {
        let expiry = current_time() + heartbeat_interval_ms as f64 / 1000.0;
        if let Some(ids) = self.by_worker.get(address) {
            for id in ids {
                if let Some(job) = self.jobs.get_mut(id) {
                    job.expiry = expiry;
                }
            }
        }
    }

    /// Mark every non-terminal active job owned by `address` FAILED,
    /// returning their ids (used when the worker pool declares that worker
    /// dead).
    pub fn fail_owned_by(&mut self, address: &[u8], message: &str) -> Vec<JobId> {
        let mut failed = Vec::new();
        if let Some(ids) = self.by_worker.get(address).cloned() {
            for id in ids {
                if let Some(job) = self.jobs.get_mut(&id) {
                    if !job.last_status.status.is_terminal() {
                        job.last_status = StatusEnvelope::new(id, StatusCode::Failed, 0, message);
                        failed.push(id);
                    }
                }
            }
        }
        failed
    }

    /// Mark any active job whose own liveness expiry has elapsed FAILED,
    /// independent of the worker pool's own sweep. This is the active-jobs
    /// side of liveness: an `ActiveJob` carries its own `expiry`, refreshed
    /// by [`Self::refresh_for_worker`], so a job can be caught here even if
    /// its worker's pool entry was already removed by another path.
    pub fn mark_failed_expired(&mut self, now: f64) -> Vec<JobId> {
        let mut failed = Vec::new();
        for (id, job) in self.jobs.iter_mut() {
            if job.expiry < now && !job.last_status.status.is_terminal() {
                job.last_status = StatusEnvelope::new(*id, StatusCode::Failed, 0, "worker liveness expired");
                failed.push(*id);
            }
        }
        failed
    }

    pub fn remove(&mut self, id: JobId) -> Option<ActiveJob> {
        let job = self.jobs.remove(&id)?;
        if let Some(ids) = self.by_worker.get_mut(&job.worker_address) {
            ids.retain(|&queued| queued != id);
        }
        Some(job)
    }
}
