//! Candidate discovery.
//!
//! [`FileScanner::scan`] returns a lazy iterator over the regular files in one source
//! directory whose name ends in the rule's extension. Nothing is cached: every call
//! reads the directory again. Entries that disappear or cannot be inspected while the
//! iterator is being consumed are skipped.

use crate::error::{Error, Result};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fs::{self, ReadDir};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// A file that matched a rule's extension filter. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub extension: String,
}

impl FileCandidate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Name-based exclusions applied on top of the extension filter.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    include_hidden: bool,
    exclude: Vec<Pattern>,
}

impl ScanFilter {
    /// Compiles the exclusion globs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first pattern that does not compile.
    pub fn new(include_hidden: bool, exclude: &[String]) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| {
                Pattern::new(p)
                    .map_err(|e| Error::Config(format!("invalid exclude pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            include_hidden,
            exclude,
        })
    }

    pub fn allows(&self, file_name: &str) -> bool {
        if !self.include_hidden && file_name.starts_with('.') {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(file_name))
    }
}

/// True if `file_name` carries `extension` (already normalized), case-insensitively.
///
/// Multi-part extensions such as `tar.gz` are supported. A name that is nothing but
/// the extension (`.pdf`) does not match.
pub fn matches_extension(file_name: &str, extension: &str) -> bool {
    let name = file_name.to_lowercase();
    let suffix = format!(".{}", extension);
    name.len() > suffix.len() && name.ends_with(&suffix)
}

#[derive(Debug, Clone, Default)]
pub struct FileScanner {
    filter: ScanFilter,
}

impl FileScanner {
    pub fn new(filter: ScanFilter) -> Self {
        Self { filter }
    }

    /// Starts enumerating `source` for files ending in `.extension`.
    ///
    /// An empty result is not an error. Only failing to open the directory is.
    ///
    /// # Errors
    ///
    /// [`Error::NoFileFound`] if `source` does not exist or is not a directory;
    /// otherwise the classified I/O error from opening it.
    pub fn scan(&self, source: &Path, extension: &str) -> Result<Candidates<'_>> {
        if !source.is_dir() {
            return Err(Error::NoFileFound {
                path: source.to_path_buf(),
            });
        }
        let entries = fs::read_dir(source).map_err(|e| Error::from_io(source, e))?;
        debug!(source = %source.display(), extension, "scanning");

        Ok(Candidates {
            entries,
            extension: extension.to_lowercase(),
            filter: &self.filter,
        })
    }
}

/// Lazy sequence of candidates from one scan.
pub struct Candidates<'a> {
    entries: ReadDir,
    extension: String,
    filter: &'a ScanFilter,
}

impl Iterator for Candidates<'_> {
    type Item = FileCandidate;

    fn next(&mut self) -> Option<FileCandidate> {
        for entry in self.entries.by_ref() {
            let Ok(entry) = entry else {
                continue;
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if !matches_extension(&name, &self.extension) || !self.filter.allows(&name) {
                continue;
            }

            // Follows symlinks: a link to a regular file is a candidate, a link to a
            // directory or a dangling link is not.
            let path = entry.path();
            match fs::metadata(&path) {
                Ok(meta) if meta.is_file() => {
                    return Some(FileCandidate {
                        path,
                        size_bytes: meta.len(),
                        extension: self.extension.clone(),
                    });
                }
                Ok(_) => trace!(path = %path.display(), "not a regular file"),
                Err(e) => trace!(path = %path.display(), error = %e, "entry vanished"),
            }
        }
        None
    }
}
