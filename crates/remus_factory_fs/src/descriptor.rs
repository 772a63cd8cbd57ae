//! Parsing for `*.remus` worker descriptor files.
//!
//! This grammar is this crate's own invention (`SPEC_FULL.md` §6 leaves the
//! format to the implementation), modeled on the original Kitware Remus
//! `.MSW` descriptor scan in `examples/original_source/meshserver/broker/WorkerFactory.cxx`:
//! one descriptor per file, first non-comment line read, rest ignored.

use crate::error::FactoryError;
use std::fs;
use std::path::{Path, PathBuf};

const DESCRIPTOR_EXTENSION: &str = "remus";

/// One parsed `*.remus` descriptor.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub input: String,
    pub output: String,
    pub worker_name: String,
    pub executable: PathBuf,
    pub args: Vec<String>,
}

/// Scan `dir` (non-recursively) for `*.remus` files and parse each one.
/// A descriptor that fails to parse is logged and skipped, not fatal —
/// matching the broker's own "never abort on a peer error" posture for its
/// external collaborators.
pub fn scan_directory(dir: &Path) -> Result<Vec<Descriptor>, FactoryError> {
    let entries = fs::read_dir(dir).map_err(|source| FactoryError::ScanDir {
        dir: dir.to_path_buf(),
        source,
    })?;

    let mut descriptors = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| FactoryError::ScanDir {
            dir: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some(DESCRIPTOR_EXTENSION) {
            continue;
        }
        match parse_file(&path) {
            Ok(Some(descriptor)) => descriptors.push(descriptor),
            Ok(None) => tracing::debug!(path = %path.display(), "descriptor file had no content line"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping malformed descriptor"),
        }
    }
    Ok(descriptors)
}

fn parse_file(path: &Path) -> Result<Option<Descriptor>, FactoryError> {
    let contents = fs::read_to_string(path).map_err(|source| FactoryError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;

    let Some(line) = contents
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))
    else {
        return Ok(None);
    };

    parse_line(line, path).map(Some)
}

fn parse_line(line: &str, path: &Path) -> Result<Descriptor, FactoryError> {
    let mut fields = line.split_whitespace();
    let input = fields
        .next()
        .ok_or_else(|| FactoryError::MalformedDescriptor { path: path.to_path_buf() })?;
    let output = fields
        .next()
        .ok_or_else(|| FactoryError::MalformedDescriptor { path: path.to_path_buf() })?;
    let worker_name = fields
        .next()
        .ok_or_else(|| FactoryError::MalformedDescriptor { path: path.to_path_buf() })?;
    let executable = fields
        .next()
        .ok_or_else(|| FactoryError::MalformedDescriptor { path: path.to_path_buf() })?;
    let args = fields.map(str::to_string).collect();

    Ok(Descriptor {
        input: input.to_string(),
        output: output.to_string(),
        worker_name: worker_name.to_string(),
        executable: PathBuf::from(executable),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_line_reads_four_fields_plus_args() {
        let descriptor = parse_line(
            "raw_edges mesh2d tetgen /usr/bin/tetgen --verbose --seed 7",
            Path::new("test.remus"),
        )
        .unwrap();
        assert_eq!(descriptor.input, "raw_edges");
        assert_eq!(descriptor.output, "mesh2d");
        assert_eq!(descriptor.worker_name, "tetgen");
        assert_eq!(descriptor.executable, PathBuf::from("/usr/bin/tetgen"));
        assert_eq!(descriptor.args, vec!["--verbose", "--seed", "7"]);
    }

    #[test]
    fn parse_line_rejects_too_few_fields() {
        assert!(parse_line("raw_edges mesh2d", Path::new("test.remus")).is_err());
    }

    #[test]
    fn parse_file_skips_comment_and_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tetgen.remus");
        std::fs::write(&path, "# a comment\n\nraw_edges mesh2d tetgen /usr/bin/tetgen\n").unwrap();
        let descriptor = parse_file(&path).unwrap().unwrap();
        assert_eq!(descriptor.worker_name, "tetgen");
    }
}
