//! The move engine.
//!
//! [`FileMover::move_all`] runs one task: it scans the task's source directory,
//! validates each candidate, and moves it into the destination directory. Every
//! candidate yields exactly one [`MoveOutcome`], in scan order, and one file's failure
//! never stops the batch.
//!
//! A move never overwrites anything. The destination name is claimed with
//! create-new semantics (`name.ext`, then `name(1).ext`, `name(2).ext`, ...), then the
//! file is renamed onto the claimed name. When rename is impossible (different file
//! systems, for instance) the file is copied, synced, and its length checked before
//! the source is deleted. Any failure removes the claimed destination again, so the
//! source is the only copy left behind.

use crate::error::{Error, ErrorKind};
use crate::scanner::{FileCandidate, FileScanner};
use crate::task_store::{RunStatus, TaskId, TaskRecord};
use crate::validation::{ValidationResult, Validator};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, warn};

/// Upper bound on disambiguation attempts for one file name.
const MAX_SUFFIX: u32 = 10_000;

/// Why a candidate was left where it is without being an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The file already lives in the destination directory.
    SameLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveResult {
    Success { destination: PathBuf, bytes: u64 },
    Skipped(SkipReason),
    Failed(ErrorKind),
}

/// Result of attempting to move one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub candidate: FileCandidate,
    pub result: MoveResult,
    pub timestamp: DateTime<Utc>,
}

impl MoveOutcome {
    fn new(candidate: FileCandidate, result: MoveResult) -> Self {
        Self {
            candidate,
            result,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.result, MoveResult::Success { .. })
    }
}

/// A run that could not start, e.g. because the source directory is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// Everything one `move_all` run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task_id: TaskId,
    pub status: RunStatus,
    pub outcomes: Vec<MoveOutcome>,
    pub setup_failure: Option<SetupFailure>,
    pub cancelled: bool,
}

impl RunReport {
    fn setup_failed(task_id: TaskId, err: &Error) -> Self {
        Self {
            task_id,
            status: RunStatus::Failed,
            outcomes: Vec::new(),
            setup_failure: Some(SetupFailure {
                kind: err.kind(),
                message: err.to_string(),
            }),
            cancelled: false,
        }
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes.len() - self.successes()
    }
}

/// Cooperative cancellation flag, checked before each candidate.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What a dry run says would happen to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    Move(PathBuf),
    Reject(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub candidate: FileCandidate,
    pub action: PlannedAction,
}

#[derive(Debug, Clone, Default)]
pub struct FileMover {
    scanner: FileScanner,
    validator: Validator,
}

impl FileMover {
    pub fn new(scanner: FileScanner, validator: Validator) -> Self {
        Self { scanner, validator }
    }

    /// Moves every matching file of `task` and reports one outcome per candidate.
    ///
    /// The caller is responsible for the `Running` guard; this only does the work.
    pub fn move_all(&self, task: &TaskRecord, cancel: &CancelToken) -> RunReport {
        self.move_all_with(task, cancel, |_| {})
    }

    /// Like [`move_all`](Self::move_all), calling `on_outcome` as each candidate
    /// finishes, in scan order. `cancel` is checked before the next candidate, so the
    /// callback itself may stop the run.
    pub fn move_all_with(
        &self,
        task: &TaskRecord,
        cancel: &CancelToken,
        mut on_outcome: impl FnMut(&MoveOutcome),
    ) -> RunReport {
        let candidates = match self.scanner.scan(&task.source, &task.extension) {
            Ok(candidates) => candidates,
            Err(e) => {
                error!(task = task.id, error = %e, "cannot start run");
                return RunReport::setup_failed(task.id, &e);
            }
        };

        let mut outcomes = Vec::new();
        let mut cancelled = false;
        for candidate in candidates {
            if cancel.is_cancelled() {
                info!(task = task.id, done = outcomes.len(), "run cancelled");
                cancelled = true;
                break;
            }
            let result = self.move_one(&candidate, &task.destination);
            debug!(task = task.id, file = %candidate.path.display(), ?result, "candidate processed");
            let outcome = MoveOutcome::new(candidate, result);
            on_outcome(&outcome);
            outcomes.push(outcome);
        }

        let successes = outcomes.iter().filter(|o| o.is_success()).count();
        let status = RunStatus::from_counts(successes, outcomes.len() - successes);
        info!(task = task.id, moved = successes, total = outcomes.len(), %status, "run complete");

        RunReport {
            task_id: task.id,
            status,
            outcomes,
            setup_failure: None,
            cancelled,
        }
    }

    fn move_one(&self, candidate: &FileCandidate, destination: &Path) -> MoveResult {
        if let ValidationResult::Rejected(kind) = self.validator.validate(candidate, destination) {
            return MoveResult::Failed(kind);
        }
        if same_location(&candidate.path, destination) {
            return MoveResult::Skipped(SkipReason::SameLocation);
        }
        let Some(file_name) = candidate.path.file_name() else {
            return MoveResult::Failed(ErrorKind::UnknownIo {
                message: format!("{} has no file name", candidate.path.display()),
                code: None,
            });
        };

        match move_file(&candidate.path, destination, file_name) {
            Ok((destination, bytes)) => MoveResult::Success { destination, bytes },
            Err(kind) => MoveResult::Failed(kind),
        }
    }

    /// Dry run: lists what `move_all` would do, without touching the file system.
    pub fn plan(&self, task: &TaskRecord) -> Result<Vec<PlannedMove>, Error> {
        let destination_blocked = task.destination.exists() && !task.destination.is_dir();
        let mut taken = HashSet::new();

        let plan = self
            .scanner
            .scan(&task.source, &task.extension)?
            .map(|candidate| {
                let action = if candidate.size_bytes == 0 {
                    PlannedAction::Reject(ErrorKind::EmptyContent)
                } else if destination_blocked {
                    PlannedAction::Reject(ErrorKind::DestinationUnwritable)
                } else {
                    let name = candidate.path.file_name().unwrap_or_default();
                    let target = next_free_name(&task.destination, name, &taken);
                    taken.insert(target.clone());
                    PlannedAction::Move(target)
                };
                PlannedMove { candidate, action }
            })
            .collect();
        Ok(plan)
    }
}

/// `name.ext` for attempt 0, `name(n).ext` after that.
pub fn disambiguated_name(file_name: &OsStr, attempt: u32) -> OsString {
    if attempt == 0 {
        return file_name.to_os_string();
    }
    let path = Path::new(file_name);
    let stem = path.file_stem().unwrap_or(file_name);
    let mut name = stem.to_os_string();
    name.push(format!("({})", attempt));
    if let Some(ext) = path.extension() {
        name.push(".");
        name.push(ext);
    }
    name
}

fn next_free_name(dir: &Path, file_name: &OsStr, taken: &HashSet<PathBuf>) -> PathBuf {
    (0..=MAX_SUFFIX)
        .map(|n| dir.join(disambiguated_name(file_name, n)))
        .find(|p| !p.exists() && !taken.contains(p))
        .unwrap_or_else(|| dir.join(file_name))
}

fn same_location(file: &Path, destination: &Path) -> bool {
    let Some(parent) = file.parent() else {
        return false;
    };
    match (fs::canonicalize(parent), fs::canonicalize(destination)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Creates an empty file under the first free disambiguated name.
fn claim_destination(dir: &Path, file_name: &OsStr) -> io::Result<(PathBuf, File)> {
    for attempt in 0..=MAX_SUFFIX {
        let path = dir.join(disambiguated_name(file_name, attempt));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                if attempt > 0 {
                    info!(name = %path.display(), "destination name taken, using suffix");
                }
                return Ok((path, file));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free name for {:?} after {} attempts", file_name, MAX_SUFFIX),
    ))
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove partial destination");
    }
}

/// Moves `src` into `dir`, returning the final path and the bytes moved.
fn move_file(src: &Path, dir: &Path, file_name: &OsStr) -> Result<(PathBuf, u64), ErrorKind> {
    let (dest, placeholder) = claim_destination(dir, file_name).map_err(|e| match e.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            ErrorKind::DestinationUnwritable
        }
        _ => ErrorKind::from_io(&e),
    })?;
    drop(placeholder);

    match fs::rename(src, &dest) {
        Ok(()) => {
            let bytes = fs::metadata(&dest).map(|m| m.len()).unwrap_or_default();
            Ok((dest, bytes))
        }
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
            ) =>
        {
            discard(&dest);
            Err(ErrorKind::from_io(&e))
        }
        Err(e) => {
            warn!(src = %src.display(), error = %e, "rename failed, falling back to copy");
            copy_then_delete(src, &dest).map(|bytes| (dest, bytes))
        }
    }
}

/// Copies `src` over the claimed `dest`, verifies the length, then deletes `src`.
///
/// On any failure `dest` is removed and `src` is left untouched.
pub(crate) fn copy_then_delete(src: &Path, dest: &Path) -> Result<u64, ErrorKind> {
    let bytes = match copy_verified(src, dest) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(src = %src.display(), error = %e, "copy failed, rolling back");
            discard(dest);
            return Err(ErrorKind::from_io(&e));
        }
    };

    match fs::remove_file(src) {
        Ok(()) => Ok(bytes),
        // Someone else removed the source; the destination is now the only copy.
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(bytes),
        Err(e) => {
            warn!(src = %src.display(), error = %e, "cannot delete source, rolling back copy");
            discard(dest);
            Err(ErrorKind::from_io(&e))
        }
    }
}

fn copy_verified(src: &Path, dest: &Path) -> io::Result<u64> {
    let mut reader = File::open(src)?;
    let meta = reader.metadata()?;
    let mut writer = OpenOptions::new().write(true).truncate(true).open(dest)?;

    let copied = io::copy(&mut reader, &mut writer)?;
    writer.sync_all()?;
    if copied != meta.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("copied {} of {} bytes", copied, meta.len()),
        ));
    }
    if let Err(e) = fs::set_permissions(dest, meta.permissions()) {
        debug!(dest = %dest.display(), error = %e, "could not copy permissions");
    }
    Ok(copied)
}
