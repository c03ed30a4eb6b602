//! Utility functions for error handling
//!
//! Filesystem checks that turn raw `io::Error`s into pipeline errors carrying
//! the path and the reason the path was needed.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{PipelineError, Result};

/// Check that a directory exists and is readable
///
/// # Arguments
/// * `path` - The directory to check
/// * `purpose` - Why the directory is needed (for error context)
pub fn validate_directory(path: &Path, purpose: &str) -> Result<()> {
    if !path.exists() {
        return Err(PipelineError::InputAbsent(format!(
            "directory {} not found (needed for {purpose})",
            path.display()
        )));
    }

    if !path.is_dir() {
        return Err(PipelineError::InputAbsent(format!(
            "{} is not a directory (expected a directory for {purpose})",
            path.display()
        )));
    }

    match fs::read_dir(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            let context = match e.kind() {
                io::ErrorKind::PermissionDenied => {
                    "permission denied - check directory permissions".to_string()
                }
                _ => format!("failed to access directory for {purpose}"),
            };
            Err(PipelineError::Io(io::Error::new(
                e.kind(),
                format!("{}: {context}: {e}", path.display()),
            )))
        }
    }
}

/// Open a file, attaching the path and purpose to any failure
pub fn safe_open_file(path: &Path, purpose: &str) -> Result<fs::File> {
    fs::File::open(path).map_err(|e| {
        let context = match e.kind() {
            io::ErrorKind::PermissionDenied => "permission denied - check file permissions",
            io::ErrorKind::NotFound => "file not found",
            _ => "failed to open file",
        };
        PipelineError::Io(io::Error::new(
            e.kind(),
            format!("{}: {context} ({purpose}): {e}", path.display()),
        ))
    })
}
