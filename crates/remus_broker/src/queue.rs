//! FIFO queue of unassigned jobs, indexed by id and by requirement class.

use remus_protocol::{JobId, JobRequirements, JobSubmission};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};

fn current_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

/// A job waiting for a matching worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: JobId,
    pub requirements: JobRequirements,
    pub submission: JobSubmission,
    pub arrival_time: f64,
}

/// FIFO of [`QueuedJob`], with a by-id index for O(1) cancel/lookup and a
/// by-requirement bucket index for dispatch.
///
/// Invariant: every id in `order` is also a key in `by_id`; no id ever
/// appears here and in the broker's active-jobs table at the same time.
#[derive(Default)]
pub struct JobQueue {
    order: VecDeque<JobId>,
    by_id: HashMap<JobId, QueuedJob>,
    by_requirements: HashMap<JobRequirements, VecDeque<JobId>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Enqueue a submission, returning the `QueuedJob` created for it.
    pub fn add_job(&mut self, id: JobId, requirements: JobRequirements, submission: JobSubmission) -> &QueuedJob {
        self.order.push_back(id);
        self.by_requirements
            .entry(requirements.clone())
            .or_default()
            .push_back(id);
        self.by_id.insert(
            id,
            QueuedJob {
                id,
                requirements,
                submission,
                arrival_time: current_time(),
            },
        );
        self.by_id.get(&id).expect("just inserted")
    }

    pub fn have_id(&self, id: JobId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn get(&self, id: JobId) -> Option<&QueuedJob> {
        self.by_id.get(&id)
    }

    /// Number of jobs still waiting in a given requirement class's bucket.
    pub fn get_bucket_len(&self, requirements: &JobRequirements) -> usize {
        self.by_requirements.get(requirements).map(|b| b.len()).unwrap_or(0)
    }

    /// The set of requirement classes with at least one waiting job.
    pub fn waiting_requirements(&self) -> Vec<JobRequirements> {
        self.by_requirements
            .iter()
            .filter(|(_, ids)| !ids.is_empty())
            .map(|(reqs, _)| reqs.clone())
            .collect()
    }

    /// Pop the oldest job matching `requirements`, if any. Maintains FIFO
    /// order within the class.
    pub fn take_job(&mut self, requirements: &JobRequirements) -> Option<QueuedJob> {
        let bucket = self.by_requirements.get_mut(requirements)?;
        let id = bucket.pop_front()?;
        self.order.retain(|&queued| queued != id);
        self.by_id.remove(&id)
    }

    /// Remove a job by id regardless of its requirement class (used by
    /// TERMINATE_JOB on a still-queued job).
    pub fn remove_by_id(&mut self, id: JobId) -> Option<QueuedJob> {
        let job = self.by_id.remove(&id)?;
        self.order.retain(|&queued| queued != id);
        if let Some(bucket) = self.by_requirements.get_mut(&job.requirements) {
            bucket.retain(|&queued| queued != id);
        }
        Some(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remus_protocol::{ContentFormat, JobContent, MeshIOType};
    use std::collections::HashMap as StdHashMap;

    fn submission() -> JobSubmission {
        let mut payload = StdHashMap::new();
        payload.insert("data".to_string(), JobContent { format: ContentFormat::Raw, bytes: vec![] });
        JobSubmission {
            requirements: sample_requirements(),
            payload,
        }
    }

    fn sample_requirements() -> JobRequirements {
        JobRequirements::new(MeshIOType::new("raw_edges", "mesh2d"), "tetgen", vec![])
    }

    #[test]
    fn fifo_within_requirement_class() {
        let mut queue = JobQueue::new();
        let a = JobId::generate();
        let b = JobId::generate();
        queue.add_job(a, sample_requirements(), submission());
        queue.add_job(b, sample_requirements(), submission());

        let first = queue.take_job(&sample_requirements()).unwrap();
        assert_eq!(first.id, a);
        let second = queue.take_job(&sample_requirements()).unwrap();
        assert_eq!(second.id, b);
        assert!(queue.take_job(&sample_requirements()).is_none());
    }

    #[test]
    fn remove_by_id_drops_from_all_indices() {
        let mut queue = JobQueue::new();
        let id = JobId::generate();
        queue.add_job(id, sample_requirements(), submission());
        assert!(queue.have_id(id));

        let removed = queue.remove_by_id(id).unwrap();
        assert_eq!(removed.id, id);
        assert!(!queue.have_id(id));
        assert!(queue.waiting_requirements().is_empty());
    }

    #[test]
    fn disjoint_requirement_buckets_do_not_cross_pollinate() {
        let mut queue = JobQueue::new();
        let other = JobRequirements::new(MeshIOType::new("raw_edges", "mesh3d"), "tetgen", vec![]);
        let id = JobId::generate();
        queue.add_job(id, sample_requirements(), submission());
        assert!(queue.take_job(&other).is_none());
        assert!(queue.take_job(&sample_requirements()).is_some());
    }
}
