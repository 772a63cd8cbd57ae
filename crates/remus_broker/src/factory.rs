//! Test-double implementations of [`remus_protocol::WorkerFactory`].
//!
//! The broker never knows what a "worker" is; it only knows how to pair
//! work with network peers. The real, file-scanning implementation lives in
//! the separately-crated `remus_factory_fs`, an external collaborator, not
//! part of this crate — the trait itself lives in `remus_protocol` so that
//! crate can implement it without depending back on the broker. The doubles
//! below live here because the broker's own test suite needs them
//! regardless of which real factory is plugged in.

pub use remus_protocol::WorkerFactory;
use remus_protocol::JobRequirements;

/// A factory that can never launch anything. Useful for exercising the
/// broker's `NoCapability` path without any subprocess machinery.
#[derive(Debug, Default)]
pub struct NullFactory;

impl WorkerFactory for NullFactory {
    fn supported_requirements(&self) -> Vec<JobRequirements> {
        Vec::new()
    }

    fn can_launch(&self, _requirements: &JobRequirements) -> bool {
        false
    }

    fn launch(&mut self, _requirements: &JobRequirements) -> bool {
        false
    }

    fn update_counts(&mut self) {}

    fn max_workers(&self) -> usize {
        0
    }

    fn current_workers(&self) -> usize {
        0
    }
}

/// A factory that claims it can launch a worker for any requirement class,
/// and always succeeds, up to `max_workers`. Used by broker tests that want
/// to exercise the dispatch-after-launch path without a real subprocess.
#[derive(Debug, Default)]
pub struct QueueEverythingFactory {
    max_workers: usize,
    current_workers: usize,
}

impl QueueEverythingFactory {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            current_workers: 0,
        }
    }
}

impl WorkerFactory for QueueEverythingFactory {
    fn supported_requirements(&self) -> Vec<JobRequirements> {
        Vec::new()
    }

    fn can_launch(&self, _requirements: &JobRequirements) -> bool {
        self.current_workers < self.max_workers
    }

    fn launch(&mut self, _requirements: &JobRequirements) -> bool {
        if self.current_workers >= self.max_workers {
            return false;
        }
        self.current_workers += 1;
        true
    }

    fn update_counts(&mut self) {}

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn current_workers(&self) -> usize {
        self.current_workers
    }
}

/// A factory that only answers for a fixed set of requirement classes
/// configured at construction time, always succeeding for those and
/// refusing everything else. Used by broker tests that need deterministic
/// `CAN_MESH` answers for more than one requirement class at once.
#[derive(Debug, Default)]
pub struct FixedCapabilityFactory {
    supported: Vec<JobRequirements>,
    max_workers: usize,
    current_workers: usize,
}

impl FixedCapabilityFactory {
    pub fn new(supported: Vec<JobRequirements>, max_workers: usize) -> Self {
        Self {
            supported,
            max_workers,
            current_workers: 0,
        }
    }
}

impl WorkerFactory for FixedCapabilityFactory {
    fn supported_requirements(&self) -> Vec<JobRequirements> {
        self.supported.clone()
    }

    fn can_launch(&self, requirements: &JobRequirements) -> bool {
        self.supported.contains(requirements) && self.current_workers < self.max_workers
    }

    fn launch(&mut self, requirements: &JobRequirements) -> bool {
        if !self.can_launch(requirements) {
            return false;
        }
        self.current_workers += 1;
        true
    }

    fn update_counts(&mut self) {}

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn current_workers(&self) -> usize {
        self.current_workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remus_protocol::MeshIOType;

    fn reqs() -> JobRequirements {
        JobRequirements::new(MeshIOType::new("raw_edges", "mesh2d"), "tetgen", vec![])
    }

    #[test]
    fn null_factory_never_launches() {
        let mut factory = NullFactory;
        assert!(!factory.can_launch(&reqs()));
        assert!(!factory.launch(&reqs()));
    }

    #[test]
    fn queue_everything_factory_respects_cap() {
        let mut factory = QueueEverythingFactory::new(1);
        assert!(factory.launch(&reqs()));
        assert!(!factory.launch(&reqs()));
    }

    #[test]
    fn fixed_capability_factory_only_answers_for_its_set() {
        let other = JobRequirements::new(MeshIOType::new("x", "y"), "other", vec![]);
        let mut factory = FixedCapabilityFactory::new(vec![reqs()], 5);
        assert!(factory.can_launch(&reqs()));
        assert!(!factory.can_launch(&other));
        assert!(factory.launch(&reqs()));
        assert!(!factory.launch(&other));
    }
}
