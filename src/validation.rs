//! Pre-move checks.
//!
//! A candidate is approved when its file still exists, is not empty, and the
//! destination directory exists (or could be created) and is writable. The only side
//! effect is creating a missing destination directory.

use crate::error::{Error, ErrorKind, Result};
use crate::scanner::FileCandidate;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Approved,
    Rejected(ErrorKind),
}

impl ValidationResult {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Validator;

impl Validator {
    /// Checks `candidate` against `destination`.
    pub fn validate(&self, candidate: &FileCandidate, destination: &Path) -> ValidationResult {
        let meta = match fs::metadata(&candidate.path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %candidate.path.display(), error = %e, "candidate vanished");
                return ValidationResult::Rejected(ErrorKind::from_io(&e));
            }
        };

        if candidate.size_bytes == 0 || meta.len() == 0 {
            debug!(path = %candidate.path.display(), "candidate is empty");
            return ValidationResult::Rejected(ErrorKind::EmptyContent);
        }

        match ensure_destination(destination) {
            Ok(()) => ValidationResult::Approved,
            Err(e) => ValidationResult::Rejected(e.kind()),
        }
    }
}

/// Makes sure `destination` is a writable directory, creating it if missing.
///
/// # Errors
///
/// [`Error::DestinationUnwritable`] if the path is not a directory, is read-only, or
/// cannot be created.
pub fn ensure_destination(destination: &Path) -> Result<()> {
    match fs::metadata(destination) {
        Ok(meta) if !meta.is_dir() => Err(Error::DestinationUnwritable {
            path: destination.to_path_buf(),
            reason: "not a directory".to_string(),
        }),
        Ok(meta) if meta.permissions().readonly() => Err(Error::DestinationUnwritable {
            path: destination.to_path_buf(),
            reason: "directory is read-only".to_string(),
        }),
        Ok(_) => Ok(()),
        Err(_) => {
            fs::create_dir_all(destination).map_err(|e| Error::DestinationUnwritable {
                path: destination.to_path_buf(),
                reason: format!("cannot create directory: {}", e),
            })?;
            info!(path = %destination.display(), "created destination directory");
            Ok(())
        }
    }
}
