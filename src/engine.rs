//! Top-level assembly and orchestration.
//!
//! [`Engine`] owns one of each component and keeps the rule store, task store and
//! stats in step. Every public operation publishes [`MainState::Loading`] and then
//! exactly one of [`MainState::Success`] or [`MainState::Error`] on the state channel.
//!
//! Per-file failures during a run are not errors at this level: they end up in the
//! task's stats, its final [`RunStatus`], and the error reporter's log. Only a run
//! that cannot start publishes `MainState::Error`.

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::mover::{CancelToken, FileMover, MoveOutcome, MoveResult, PlannedMove, RunReport};
use crate::reporting::{ErrorReporter, UserFacingMessage};
use crate::rule::{Rule, RuleEntry, RuleId, RuleStore};
use crate::scanner::FileScanner;
use crate::stats::{Stats, StatsAggregator};
use crate::task_store::{RunStart, RunStatus, TaskId, TaskRecord, TaskStore};
use crate::validation::Validator;
use rayon::prelude::*;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the UI layer is told after each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainState {
    Loading,
    Success(Vec<TaskRecord>),
    Error(String),
}

/// Result of asking a task to run.
#[derive(Debug, Clone)]
pub enum RunTrigger {
    Completed(RunReport),
    /// The task was already running; this trigger did nothing.
    AlreadyRunning,
    /// The task is disabled.
    Inactive,
}

impl RunTrigger {
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Leaves `Running` when dropped, so a panicking run cannot wedge its task.
struct RunGuard<'a> {
    tasks: &'a TaskStore,
    id: TaskId,
    status: RunStatus,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.tasks.finish_run(self.id, self.status);
    }
}

pub struct Engine {
    rules: RuleStore,
    tasks: TaskStore,
    mover: FileMover,
    stats: StatsAggregator,
    reporter: ErrorReporter,
    state: watch::Sender<MainState>,
}

impl Engine {
    /// Wires the given components together.
    pub fn new(
        rules: RuleStore,
        tasks: TaskStore,
        mover: FileMover,
        stats: StatsAggregator,
        reporter: ErrorReporter,
    ) -> Self {
        let (state, _) = watch::channel(MainState::Success(tasks.get_all()));
        Self {
            rules,
            tasks,
            mover,
            stats,
            reporter,
            state,
        }
    }

    /// Builds every component from `config` and adds the configured rules.
    ///
    /// Configured rules whose extension and source already have a stored rule are
    /// left alone, so a rule the user disabled stays disabled across restarts.
    pub fn assemble(config: &AppConfig) -> Result<Self> {
        let max_errors = config.reporting.max_errors;
        let (rules, tasks, stats, reporter) = match config.data_dir() {
            Some(dir) => {
                info!(data_dir = %dir.display(), "using persistent storage");
                (
                    RuleStore::open(&dir)?,
                    TaskStore::open(&dir)?,
                    StatsAggregator::open(&dir)?,
                    ErrorReporter::open(&dir, max_errors)?,
                )
            }
            None => (
                RuleStore::in_memory(),
                TaskStore::in_memory(),
                StatsAggregator::in_memory(),
                ErrorReporter::new(max_errors),
            ),
        };
        let mover = FileMover::new(FileScanner::new(config.scan_filter()?), Validator);
        let engine = Self::new(rules, tasks, mover, stats, reporter);

        for rule in config.rules()? {
            let known = engine
                .rules
                .list()
                .iter()
                .any(|e| e.rule.conflicts_with(&rule));
            if known {
                debug!(extension = %rule.extension, "configured rule already stored");
                continue;
            }
            engine.insert_rule(rule)?;
        }
        engine.publish_success();
        Ok(engine)
    }

    /// Receiver for [`MainState`] transitions; holds the latest state only.
    pub fn subscribe_state(&self) -> watch::Receiver<MainState> {
        self.state.subscribe()
    }

    /// Receiver for the live task list.
    pub fn subscribe_tasks(&self) -> watch::Receiver<Vec<TaskRecord>> {
        self.tasks.subscribe()
    }

    fn publish_success(&self) {
        self.state.send_replace(MainState::Success(self.tasks.get_all()));
    }

    /// Publishes the outcome of an operation and passes the result through.
    fn settle<T>(&self, result: Result<T>, context: &str) -> Result<T> {
        match &result {
            Ok(_) => self.publish_success(),
            Err(e) => {
                let message = self.reporter.report_error(e, context);
                self.state.send_replace(MainState::Error(message.to_string()));
            }
        }
        result
    }

    fn begin(&self) {
        self.state.send_replace(MainState::Loading);
    }

    // Rules and tasks

    /// Adds a rule and materializes its task, active by default.
    pub fn add_rule(&self, rule: Rule) -> Result<TaskRecord> {
        self.begin();
        let result = self.insert_rule(rule);
        self.settle(result, "add rule")
    }

    fn insert_rule(&self, rule: Rule) -> Result<TaskRecord> {
        let rule_id = self.rules.add(rule.clone())?;
        let task = match self.tasks.insert(&rule, true) {
            Ok(task) => task,
            Err(e) => {
                // Keep the stores in step: no rule without its task.
                if let Err(undo) = self.rules.remove(rule_id) {
                    warn!(rule = rule_id, error = %undo, "could not roll back rule");
                }
                return Err(e);
            }
        };
        self.rules.link_task(rule_id, task.id)?;
        Ok(task)
    }

    /// Changes a rule's definition and carries the change to its task.
    pub fn update_rule(&self, rule_id: RuleId, rule: Rule) -> Result<TaskRecord> {
        self.begin();
        let result = self.rules.update(rule_id, rule).and_then(|entry| {
            let task_id = entry.task_id.ok_or(Error::RuleNotFound(rule_id))?;
            let mut task = self.tasks.get_by_id(task_id)?;
            task.extension = entry.rule.extension;
            task.source = entry.rule.source;
            task.destination = entry.rule.destination;
            self.tasks.update(task)
        });
        self.settle(result, "update rule")
    }

    /// Removes a rule together with its task and stats.
    pub fn remove_rule(&self, rule_id: RuleId) -> Result<()> {
        self.begin();
        let result = self.rules.remove(rule_id).and_then(|entry| match entry.task_id {
            Some(task_id) => self.drop_task(task_id),
            None => Ok(()),
        });
        self.settle(result, "remove rule")
    }

    /// Removes a task and the rule it was materialized from.
    pub fn remove_task(&self, task_id: TaskId) -> Result<()> {
        self.begin();
        let result = self.tasks.get_by_id(task_id).and_then(|_| {
            if let Some(entry) = self.rules.find_by_task(task_id) {
                self.rules.remove(entry.id)?;
            }
            self.drop_task(task_id)
        });
        self.settle(result, "remove task")
    }

    fn drop_task(&self, task_id: TaskId) -> Result<()> {
        self.tasks.delete(task_id)?;
        self.stats.reset(task_id)
    }

    /// Enables or disables a task (and its rule). Disabled tasks are skipped by runs.
    pub fn set_task_active(&self, task_id: TaskId, active: bool) -> Result<TaskRecord> {
        self.begin();
        let result = self.tasks.get_by_id(task_id).and_then(|mut task| {
            if let Some(entry) = self.rules.find_by_task(task_id) {
                self.rules.set_active(entry.id, active)?;
            }
            task.is_active = active;
            self.tasks.update(task)
        });
        self.settle(result, "toggle task")
    }

    /// Bulk reset: deletes every rule, task and counter.
    pub fn reset(&self) -> Result<()> {
        self.begin();
        let result = self
            .rules
            .clear()
            .and_then(|()| self.tasks.delete_all())
            .and_then(|()| self.stats.reset_all());
        info!("engine reset");
        self.settle(result, "reset")
    }

    pub fn rules(&self) -> Vec<RuleEntry> {
        self.rules.list()
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.tasks.get_all()
    }

    pub fn task(&self, task_id: TaskId) -> Result<TaskRecord> {
        self.tasks.get_by_id(task_id)
    }

    pub fn task_status(&self, task_id: TaskId) -> Result<RunStatus> {
        self.tasks.status(task_id)
    }

    // Runs

    /// Runs one task. A second trigger while it is running returns
    /// [`RunTrigger::AlreadyRunning`] without doing anything.
    pub fn run_task(&self, task_id: TaskId, cancel: &CancelToken) -> Result<RunTrigger> {
        self.run_task_with(task_id, cancel, |_| {})
    }

    /// Like [`run_task`](Self::run_task), calling `on_outcome` as each file finishes.
    pub fn run_task_with(
        &self,
        task_id: TaskId,
        cancel: &CancelToken,
        on_outcome: impl FnMut(&MoveOutcome),
    ) -> Result<RunTrigger> {
        self.begin();
        let result = self.execute(task_id, cancel, on_outcome);
        if result.is_err() {
            return self.settle(result, "run task");
        }

        let setup_failure = match &result {
            Ok(RunTrigger::Completed(report)) => report.setup_failure.as_ref(),
            _ => None,
        };
        match setup_failure {
            Some(failure) => {
                self.state
                    .send_replace(MainState::Error(failure.message.clone()));
            }
            None => self.publish_success(),
        }
        result
    }

    fn execute(
        &self,
        task_id: TaskId,
        cancel: &CancelToken,
        mut on_outcome: impl FnMut(&MoveOutcome),
    ) -> Result<RunTrigger> {
        let task = match self.tasks.begin_run(task_id)? {
            RunStart::Started(task) => task,
            RunStart::AlreadyRunning => return Ok(RunTrigger::AlreadyRunning),
            RunStart::Inactive => return Ok(RunTrigger::Inactive),
        };
        let mut guard = RunGuard {
            tasks: &self.tasks,
            id: task_id,
            status: RunStatus::Failed,
        };

        info!(task = task_id, extension = %task.extension, source = %task.source.display(), "run started");
        let report = self.mover.move_all_with(&task, cancel, |outcome| {
            if let MoveResult::Failed(kind) = &outcome.result {
                self.reporter
                    .report(kind, &outcome.candidate.path.display().to_string());
            }
            on_outcome(outcome);
        });

        if let Some(failure) = &report.setup_failure {
            self.reporter
                .report(&failure.kind, &task.source.display().to_string());
        }
        if let Err(e) = self.stats.record_all(&report.outcomes, task_id) {
            self.reporter.report_error(&e, "record stats");
        }

        guard.status = report.status;
        Ok(RunTrigger::Completed(report))
    }

    /// Runs every active task concurrently, one run per task.
    pub fn run_all(&self, cancel: &CancelToken) -> Vec<(TaskId, Result<RunTrigger>)> {
        self.run_all_with(cancel, |_, _| {})
    }

    /// Like [`run_all`](Self::run_all), calling `on_task_done` from the worker thread
    /// as soon as each task's run returns.
    pub fn run_all_with(
        &self,
        cancel: &CancelToken,
        on_task_done: impl Fn(TaskId, &Result<RunTrigger>) + Sync,
    ) -> Vec<(TaskId, Result<RunTrigger>)> {
        let active: Vec<TaskId> = self
            .tasks
            .get_all()
            .into_iter()
            .filter(|t| t.is_active)
            .map(|t| t.id)
            .collect();
        info!(tasks = active.len(), "running all active tasks");

        active
            .into_par_iter()
            .map(|id| {
                let result = self.run_task(id, cancel);
                on_task_done(id, &result);
                (id, result)
            })
            .collect()
    }

    /// Dry run of one task.
    pub fn plan_task(&self, task_id: TaskId) -> Result<Vec<PlannedMove>> {
        self.begin();
        let result = self
            .tasks
            .get_by_id(task_id)
            .and_then(|task| self.mover.plan(&task));
        self.settle(result, "plan task")
    }

    // Stats and diagnostics

    pub fn stats(&self, task_id: TaskId) -> Stats {
        self.stats.get(task_id)
    }

    pub fn all_stats(&self) -> Vec<Stats> {
        self.stats.all()
    }

    /// Resets one task's counters, or all of them.
    pub fn reset_stats(&self, task_id: Option<TaskId>) -> Result<()> {
        self.begin();
        let result = match task_id {
            Some(id) => self.stats.reset(id),
            None => self.stats.reset_all(),
        };
        self.settle(result, "reset stats")
    }

    pub fn recent_errors(&self) -> Vec<UserFacingMessage> {
        self.reporter.recent()
    }
}
