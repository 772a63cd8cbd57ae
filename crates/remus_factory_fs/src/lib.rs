//! The default, file-scanning [`remus_broker::WorkerFactory`] implementation.
//!
//! On construction this factory scans a configured directory for `*.remus`
//! descriptor files, each naming one requirement triple this factory can
//! launch a worker process for. The broker never parses this format — only
//! this crate does, as an external collaborator with its own descriptor
//! grammar, per `SPEC_FULL.md` §6/§9.
//!
//! Descriptor grammar, one descriptor per `*.remus` file:
//!
//! ```text
//! <input> <output> <worker_name> <executable_path> [args...]
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Only the first
//! non-comment line of a file is read.

mod descriptor;
mod error;

pub use descriptor::Descriptor;
pub use error::FactoryError;

use remus_protocol::{JobRequirements, MeshIOType, WorkerFactory};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::mpsc;
use tracing::{debug, info, warn};

/// A single entry scanned from a `*.remus` descriptor file.
#[derive(Debug, Clone)]
struct Launchable {
    requirements: JobRequirements,
    executable: PathBuf,
    args: Vec<String>,
}

fn matches(requirements: &JobRequirements, entry: &Launchable) -> bool {
    entry.requirements.io_type == requirements.io_type
        && entry.requirements.worker_name == requirements.worker_name
}

/// Bookkeeping for a process this factory spawned. The actual `Child`
/// handle is moved onto the watcher thread that blocks on `wait()`; this
/// factory only needs the pid and requirements to report reaping, since the
/// broker talks to the spawned process over ZMQ, never by signal.
struct RunningProcess {
    requirements: JobRequirements,
}

/// The filesystem-backed [`WorkerFactory`]. Scans `dir` once at
/// construction for `.remus` descriptors; does not watch for changes.
pub struct FsFactory {
    launchable: Vec<Launchable>,
    max_workers: usize,
    running: HashMap<u32, RunningProcess>,
    exited_rx: mpsc::Receiver<u32>,
    exited_tx: mpsc::Sender<u32>,
}

impl FsFactory {
    /// Scan `dir` for `*.remus` descriptor files.
    pub fn scan(dir: impl AsRef<Path>, max_workers: usize) -> Result<Self, FactoryError> {
        let descriptors = descriptor::scan_directory(dir.as_ref())?;
        info!(
            dir = %dir.as_ref().display(),
            count = descriptors.len(),
            "factory scanned worker descriptors"
        );
        let (exited_tx, exited_rx) = mpsc::channel();
        Ok(Self {
            launchable: descriptors
                .into_iter()
                .map(|d| Launchable {
                    requirements: JobRequirements::new(
                        MeshIOType::new(d.input, d.output),
                        d.worker_name,
                        Vec::new(),
                    ),
                    executable: d.executable,
                    args: d.args,
                })
                .collect(),
            max_workers,
            running: HashMap::new(),
            exited_tx,
            exited_rx,
        })
    }

    fn find(&self, requirements: &JobRequirements) -> Option<&Launchable> {
        self.launchable.iter().find(|entry| matches(requirements, entry))
    }
}

impl WorkerFactory for FsFactory {
    fn supported_requirements(&self) -> Vec<JobRequirements> {
        self.launchable.iter().map(|entry| entry.requirements.clone()).collect()
    }

    fn can_launch(&self, requirements: &JobRequirements) -> bool {
        self.find(requirements).is_some() && self.running.len() < self.max_workers
    }

    fn launch(&mut self, requirements: &JobRequirements) -> bool {
        let Some(entry) = self.find(requirements).cloned() else {
            return false;
        };
        if self.running.len() >= self.max_workers {
            debug!("factory at capacity, refusing to launch");
            return false;
        }

        let mut command = Command::new(&entry.executable);
        command.args(&entry.args);
        match command.spawn() {
            Ok(mut child) => {
                let pid = child.id();
                let tx = self.exited_tx.clone();
                std::thread::spawn(move || {
                    let _ = child.wait();
                    let _ = tx.send(pid);
                });
                self.running.insert(
                    pid,
                    RunningProcess {
                        requirements: requirements.clone(),
                    },
                );
                true
            }
            Err(e) => {
                warn!(
                    executable = %entry.executable.display(),
                    error = %e,
                    "failed to spawn worker process"
                );
                false
            }
        }
    }

    fn update_counts(&mut self) {
        while let Ok(pid) = self.exited_rx.try_recv() {
            if let Some(handle) = self.running.remove(&pid) {
                info!(
                    pid,
                    requirements = %handle.requirements.io_type,
                    "factory reaped exited worker process"
                );
            }
        }
    }

    fn max_workers(&self) -> usize {
        self.max_workers
    }

    fn current_workers(&self) -> usize {
        self.running.len()
    }
}
