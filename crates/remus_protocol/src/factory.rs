//! The broker's pluggable worker-factory contract.
//!
//! This trait lives in `remus_protocol`, not `remus_broker`, so that an
//! external collaborator crate (such as `remus_factory_fs`) can implement it
//! without depending on the broker itself — only on the wire-level types
//! both sides agree on. The broker never knows what a "worker" is; it only
//! knows how to pair work with network peers, with a [`WorkerFactory`] as an
//! asynchronous hint that more peers may appear.

use crate::JobRequirements;

/// Trait object the broker holds exactly one boxed instance of.
pub trait WorkerFactory: Send {
    /// Requirement classes this factory knows how to launch workers for.
    fn supported_requirements(&self) -> Vec<JobRequirements>;

    /// Whether this factory could, in principle, launch a worker
    /// satisfying `requirements` (ignoring capacity).
    fn can_launch(&self, requirements: &JobRequirements) -> bool;

    /// Attempt to launch a worker for `requirements`. Returns `false` if
    /// the factory is at capacity or otherwise declines.
    fn launch(&mut self, requirements: &JobRequirements) -> bool;

    /// Reconcile any asynchronously-completed launches or exits (e.g. a
    /// child process reaped on a background thread). Called once per
    /// dispatch tick.
    fn update_counts(&mut self);

    fn max_workers(&self) -> usize;

    fn current_workers(&self) -> usize;
}
