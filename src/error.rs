//! Error taxonomy for the move engine.
//!
//! Two layers live here:
//! - [`ErrorKind`], the flat classification every failure is reduced to. Per-file
//!   outcomes carry it, the stats and reporting services consume it.
//! - [`Error`], the crate error returned from fallible operations (rule changes,
//!   storage, configuration, run setup).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of a failure, stable across the whole crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The source file or directory vanished, or never existed.
    NoFileFound,
    /// The file has zero length.
    EmptyContent,
    /// The operating system refused access.
    Permission,
    /// The destination directory is missing and could not be created, or is read-only.
    DestinationUnwritable,
    /// A rule for the same extension and source directory already exists.
    DuplicateRule,
    /// Any other I/O failure, with the original message and OS error code.
    UnknownIo { message: String, code: Option<i32> },
}

impl ErrorKind {
    /// Classifies an I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NoFileFound,
            io::ErrorKind::PermissionDenied => Self::Permission,
            _ => Self::UnknownIo {
                message: err.to_string(),
                code: err.raw_os_error(),
            },
        }
    }

    /// Short machine-friendly label, used in logs and tables.
    pub fn label(&self) -> &'static str {
        match self {
            Self::NoFileFound => "NoFileFoundError",
            Self::EmptyContent => "EmptyContentError",
            Self::Permission => "PermissionError",
            Self::DestinationUnwritable => "DestinationUnwritableError",
            Self::DuplicateRule => "DuplicateRuleError",
            Self::UnknownIo { .. } => "UnknownIOError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownIo {
                message,
                code: Some(code),
            } => write!(f, "{} (os error {}): {}", self.label(), code, message),
            Self::UnknownIo { message, code: None } => write!(f, "{}: {}", self.label(), message),
            _ => f.write_str(self.label()),
        }
    }
}

/// Errors returned by fallible engine operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("No file or directory found at {}", .path.display())]
    NoFileFound { path: PathBuf },

    #[error("Permission denied for {}: {source}", .path.display())]
    Permission { path: PathBuf, source: io::Error },

    #[error("Destination {} is not writable: {reason}", .path.display())]
    DestinationUnwritable { path: PathBuf, reason: String },

    #[error("A rule for '.{extension}' files in {} already exists", .source_dir.display())]
    DuplicateRule {
        extension: String,
        source_dir: PathBuf,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("No rule with id {0}")]
    RuleNotFound(u64),

    #[error("No task with id {0}")]
    TaskNotFound(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Wraps an I/O error for `path`, keeping the not-found and permission cases distinct.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => Self::NoFileFound { path },
            io::ErrorKind::PermissionDenied => Self::Permission { path, source },
            _ => Self::Io { path, source },
        }
    }

    /// Projects this error onto the flat taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoFileFound { .. } | Self::RuleNotFound(_) | Self::TaskNotFound(_) => {
                ErrorKind::NoFileFound
            }
            Self::Permission { .. } => ErrorKind::Permission,
            Self::DestinationUnwritable { .. } => ErrorKind::DestinationUnwritable,
            Self::DuplicateRule { .. } => ErrorKind::DuplicateRule,
            Self::Io { source, .. } => ErrorKind::from_io(source),
            Self::InvalidRule(message) | Self::Config(message) | Self::Storage(message) => {
                ErrorKind::UnknownIo {
                    message: message.clone(),
                    code: None,
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
