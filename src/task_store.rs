//! Task records: one per configured rule, plus their run status.
//!
//! The store is the only shared mutable state in the engine. Every read and write of
//! a record's status goes through one mutex, so the check-and-set that enters
//! [`RunStatus::Running`] cannot race with another trigger for the same task.
//!
//! Consumers that want a live view call [`TaskStore::subscribe`]: the receiver always
//! holds the latest full list, and superseded snapshots are never buffered.

use crate::error::{Error, Result};
use crate::rule::Rule;
use crate::storage::{self, Row, Schema, TASKS_SCHEMA, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, info};

pub type TaskId = u64;

/// A persisted rule-to-run mapping. Callers always get a snapshot copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub extension: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    pub is_active: bool,
}

impl Row for TaskRecord {
    const SCHEMA: Schema = TASKS_SCHEMA;

    fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".into(), json!(self.id));
        row.insert("task_type".into(), json!(self.extension));
        row.insert("task_from".into(), json!(self.source.to_string_lossy()));
        row.insert("task_to".into(), json!(self.destination.to_string_lossy()));
        row.insert("is_active".into(), json!(self.is_active));
        row
    }

    fn from_row(row: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            id: storage::integer(row, "id"),
            extension: storage::text(row, "task_type"),
            source: PathBuf::from(storage::text(row, "task_from")),
            destination: PathBuf::from(storage::text(row, "task_to")),
            is_active: storage::boolean(row, "is_active"),
        })
    }
}

/// Where a task is in its run lifecycle.
///
/// `Idle → Running → {Succeeded | PartiallyFailed | Failed}`; a finished task may be
/// run again, which re-enters `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Idle,
    Running,
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl RunStatus {
    /// Derives the final status of a run from its success and failure counts.
    pub fn from_counts(successes: usize, failures: usize) -> Self {
        match (successes, failures) {
            (_, 0) => Self::Succeeded,
            (0, _) => Self::Failed,
            _ => Self::PartiallyFailed,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::PartiallyFailed => "partially failed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// How a request to enter `Running` was answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStart {
    /// The task is now `Running`; this is the snapshot to run.
    Started(TaskRecord),
    AlreadyRunning,
    Inactive,
}

#[derive(Debug, Clone, Default)]
struct Inner {
    next_id: TaskId,
    records: BTreeMap<TaskId, TaskRecord>,
    status: HashMap<TaskId, RunStatus>,
}

impl Inner {
    fn snapshot(&self) -> Vec<TaskRecord> {
        self.records.values().cloned().collect()
    }
}

/// Owns every [`TaskRecord`].
#[derive(Debug)]
pub struct TaskStore {
    inner: Mutex<Inner>,
    table: Option<Table>,
    updates: watch::Sender<Vec<TaskRecord>>,
}

impl TaskStore {
    pub fn in_memory() -> Self {
        Self::with_records(Vec::new(), 1, None)
    }

    /// Opens (or creates) the persisted `tasks` table inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let table = Table::open(data_dir, TaskRecord::SCHEMA)?;
        let contents = table.load_contents::<TaskRecord>()?;
        debug!(tasks = contents.rows.len(), next_id = contents.next_id, "opened task store");
        Ok(Self::with_records(contents.rows, contents.next_id, Some(table)))
    }

    fn with_records(records: Vec<TaskRecord>, next_id: TaskId, table: Option<Table>) -> Self {
        let records: BTreeMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        let inner = Inner {
            next_id,
            status: records.keys().map(|id| (*id, RunStatus::Idle)).collect(),
            records,
        };
        let (updates, _) = watch::channel(inner.snapshot());
        Self {
            inner: Mutex::new(inner),
            table,
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `change` to a copy of the state, persists the copy, and only then
    /// makes it current and publishes it. A failed save leaves the store untouched.
    fn commit<T>(&self, change: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self.lock();
        let mut staged = inner.clone();
        let value = change(&mut staged)?;

        let snapshot = staged.snapshot();
        if let Some(table) = &self.table {
            table.save_with_next_id(&snapshot, staged.next_id)?;
        }
        *inner = staged;
        self.updates.send_replace(snapshot);
        Ok(value)
    }

    /// Materializes a task for `rule` and returns it with its assigned id.
    pub fn insert(&self, rule: &Rule, is_active: bool) -> Result<TaskRecord> {
        let record = self.commit(|inner| {
            let id = inner.next_id;
            inner.next_id += 1;
            let record = TaskRecord {
                id,
                extension: rule.extension.clone(),
                source: rule.source.clone(),
                destination: rule.destination.clone(),
                is_active,
            };
            inner.records.insert(id, record.clone());
            inner.status.insert(id, RunStatus::Idle);
            Ok(record)
        })?;
        info!(id = record.id, extension = %record.extension, "task created");
        Ok(record)
    }

    /// Overwrites the stored fields of an existing task. The run status is untouched.
    pub fn update(&self, record: TaskRecord) -> Result<TaskRecord> {
        self.commit(|inner| {
            let slot = inner
                .records
                .get_mut(&record.id)
                .ok_or(Error::TaskNotFound(record.id))?;
            *slot = record.clone();
            Ok(())
        })?;
        debug!(id = record.id, active = record.is_active, "task updated");
        Ok(record)
    }

    pub fn delete(&self, id: TaskId) -> Result<TaskRecord> {
        let removed = self.commit(|inner| {
            let removed = inner.records.remove(&id).ok_or(Error::TaskNotFound(id))?;
            inner.status.remove(&id);
            Ok(removed)
        })?;
        info!(id, "task deleted");
        Ok(removed)
    }

    /// Deletes every task. Ids keep counting up.
    pub fn delete_all(&self) -> Result<()> {
        self.commit(|inner| {
            inner.records.clear();
            inner.status.clear();
            Ok(())
        })?;
        info!("all tasks deleted");
        Ok(())
    }

    pub fn get_by_id(&self, id: TaskId) -> Result<TaskRecord> {
        self.lock()
            .records
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))
    }

    /// All tasks ordered by id.
    pub fn get_all(&self) -> Vec<TaskRecord> {
        self.lock().snapshot()
    }

    /// A receiver that always holds the latest full task list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<TaskRecord>> {
        self.updates.subscribe()
    }

    pub fn status(&self, id: TaskId) -> Result<RunStatus> {
        self.lock()
            .status
            .get(&id)
            .copied()
            .ok_or(Error::TaskNotFound(id))
    }

    /// Enters `Running` and returns a snapshot of the task to run.
    ///
    /// The activity flag and the running flag are both checked under the store lock,
    /// so a task disabled concurrently is never started. Anything but
    /// [`RunStart::Started`] must be treated by the caller as a no-op.
    pub fn begin_run(&self, id: TaskId) -> Result<RunStart> {
        let mut inner = self.lock();
        let record = inner
            .records
            .get(&id)
            .cloned()
            .ok_or(Error::TaskNotFound(id))?;
        if !record.is_active {
            debug!(id, "task inactive, not running");
            return Ok(RunStart::Inactive);
        }

        let status = inner.status.entry(id).or_insert(RunStatus::Idle);
        if *status == RunStatus::Running {
            debug!(id, "task already running, trigger ignored");
            return Ok(RunStart::AlreadyRunning);
        }
        *status = RunStatus::Running;
        Ok(RunStart::Started(record))
    }

    /// Leaves `Running` with the final status. A task deleted mid-run is ignored.
    pub fn finish_run(&self, id: TaskId, status: RunStatus) {
        let mut inner = self.lock();
        if inner.records.contains_key(&id) {
            inner.status.insert(id, status);
            debug!(id, %status, "task run finished");
        }
    }
}
