//! Errors raised scanning and parsing `*.remus` descriptor files.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("failed to scan descriptor directory {dir}: {source}")]
    ScanDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read descriptor file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed descriptor file {path}: expected `<input> <output> <worker_name> <executable> [args...]`")]
    MalformedDescriptor { path: PathBuf },
}
