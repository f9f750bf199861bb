//! Per-task counters derived from move outcomes.
//!
//! Counters are created lazily the first time a task records an outcome and only go
//! up, until the user resets them. The mover emits exactly one outcome per candidate,
//! so nothing here deduplicates.

use crate::error::Result;
use crate::mover::{MoveOutcome, MoveResult};
use crate::storage::{self, Row, STATS_SCHEMA, Schema, Table};
use crate::task_store::TaskId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    pub task_id: TaskId,
    pub files_moved: u64,
    pub bytes_moved: u64,
    pub failures: u64,
}

impl Stats {
    fn empty(task_id: TaskId) -> Self {
        Self {
            task_id,
            ..Self::default()
        }
    }

    fn apply(&mut self, outcome: &MoveOutcome) {
        match &outcome.result {
            MoveResult::Success { bytes, .. } => {
                self.files_moved += 1;
                self.bytes_moved += bytes;
            }
            MoveResult::Skipped(_) | MoveResult::Failed(_) => self.failures += 1,
        }
    }
}

impl Row for Stats {
    const SCHEMA: Schema = STATS_SCHEMA;

    fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("task_id".into(), json!(self.task_id));
        row.insert("files_moved".into(), json!(self.files_moved));
        row.insert("bytes_moved".into(), json!(self.bytes_moved));
        row.insert("failures".into(), json!(self.failures));
        row
    }

    fn from_row(row: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            task_id: storage::integer(row, "task_id"),
            files_moved: storage::integer(row, "files_moved"),
            bytes_moved: storage::integer(row, "bytes_moved"),
            failures: storage::integer(row, "failures"),
        })
    }
}

#[derive(Debug)]
pub struct StatsAggregator {
    counters: Mutex<BTreeMap<TaskId, Stats>>,
    table: Option<Table>,
}

impl StatsAggregator {
    pub fn in_memory() -> Self {
        Self {
            counters: Mutex::new(BTreeMap::new()),
            table: None,
        }
    }

    pub fn open(data_dir: &Path) -> Result<Self> {
        let table = Table::open(data_dir, Stats::SCHEMA)?;
        let rows: Vec<Stats> = table.load()?;
        Ok(Self {
            counters: Mutex::new(rows.into_iter().map(|s| (s.task_id, s)).collect()),
            table: Some(table),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<TaskId, Stats>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, counters: &BTreeMap<TaskId, Stats>) -> Result<()> {
        match &self.table {
            Some(table) => table.save(counters.values()),
            None => Ok(()),
        }
    }

    /// Counts one outcome against `task_id`.
    pub fn record(&self, outcome: &MoveOutcome, task_id: TaskId) -> Result<()> {
        self.record_all(std::slice::from_ref(outcome), task_id)
    }

    /// Counts a batch of outcomes and persists once.
    pub fn record_all(&self, outcomes: &[MoveOutcome], task_id: TaskId) -> Result<()> {
        if outcomes.is_empty() {
            return Ok(());
        }
        let mut counters = self.lock();
        let stats = counters
            .entry(task_id)
            .or_insert_with(|| Stats::empty(task_id));
        for outcome in outcomes {
            stats.apply(outcome);
        }
        debug!(task = task_id, ?stats, "stats updated");
        self.persist(&counters)
    }

    /// Current counters for a task; zero if it never recorded anything.
    pub fn get(&self, task_id: TaskId) -> Stats {
        self.lock()
            .get(&task_id)
            .copied()
            .unwrap_or_else(|| Stats::empty(task_id))
    }

    pub fn all(&self) -> Vec<Stats> {
        self.lock().values().copied().collect()
    }

    /// Drops a task's counters (explicit user reset, or the task was deleted).
    pub fn reset(&self, task_id: TaskId) -> Result<()> {
        let mut counters = self.lock();
        if counters.remove(&task_id).is_some() {
            info!(task = task_id, "stats reset");
            self.persist(&counters)?;
        }
        Ok(())
    }

    pub fn reset_all(&self) -> Result<()> {
        let mut counters = self.lock();
        counters.clear();
        info!("all stats reset");
        self.persist(&counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scanner::FileCandidate;
    use chrono::Utc;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn outcome(size: u64, result: MoveResult) -> MoveOutcome {
        MoveOutcome {
            candidate: FileCandidate {
                path: PathBuf::from("/in/file.pdf"),
                size_bytes: size,
                extension: "pdf".to_string(),
            },
            result,
            timestamp: Utc::now(),
        }
    }

    fn success(bytes: u64) -> MoveOutcome {
        outcome(
            bytes,
            MoveResult::Success {
                destination: PathBuf::from("/out/file.pdf"),
                bytes,
            },
        )
    }

    #[test]
    fn test_unknown_task_reads_as_zero() {
        let stats = StatsAggregator::in_memory();
        assert_eq!(stats.get(9), Stats::empty(9));
        assert!(stats.all().is_empty());
    }

    #[test]
    fn test_record_counts_success_and_failure() {
        let stats = StatsAggregator::in_memory();
        stats.record(&success(10240), 1).expect("record");
        stats
            .record(&outcome(0, MoveResult::Failed(ErrorKind::EmptyContent)), 1)
            .expect("record");

        let counters = stats.get(1);
        assert_eq!(counters.files_moved, 1);
        assert_eq!(counters.bytes_moved, 10240);
        assert_eq!(counters.failures, 1);
    }

    #[test]
    fn test_tasks_are_counted_separately() {
        let stats = StatsAggregator::in_memory();
        stats.record_all(&[success(1), success(2)], 1).expect("record");
        stats.record_all(&[success(5)], 2).expect("record");

        assert_eq!(stats.get(1).bytes_moved, 3);
        assert_eq!(stats.get(2).files_moved, 1);
    }

    #[test]
    fn test_reset() {
        let stats = StatsAggregator::in_memory();
        stats.record(&success(1), 1).expect("record");
        stats.record(&success(1), 2).expect("record");

        stats.reset(1).expect("reset");
        assert_eq!(stats.get(1).files_moved, 0);
        assert_eq!(stats.get(2).files_moved, 1);

        stats.reset_all().expect("reset all");
        assert!(stats.all().is_empty());
    }

    #[test]
    fn test_persisted_stats_survive_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        {
            let stats = StatsAggregator::open(temp_dir.path()).expect("open");
            stats.record(&success(42), 3).expect("record");
        }

        let stats = StatsAggregator::open(temp_dir.path()).expect("reopen");
        assert_eq!(stats.get(3).bytes_moved, 42);
    }
}
