//! Terminal output for the binary: coloured status lines, a progress bar for runs,
//! and the task and stats tables.

use crate::engine::RunTrigger;
use crate::error::Result;
use crate::mover::{MoveResult, PlannedAction, PlannedMove, RunReport};
use crate::reporting::UserFacingMessage;
use crate::stats::Stats;
use crate::task_store::{RunStatus, TaskId, TaskRecord};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

pub struct OutputFormatter;

impl OutputFormatter {
    /// Prints a success message in green with a checkmark.
    pub fn success(message: &str) {
        println!("{} {}", "✓".green(), message);
    }

    /// Prints an error message in red with an X mark.
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red(), message);
    }

    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow(), message);
    }

    pub fn info(message: &str) {
        println!("{}", message.cyan());
    }

    pub fn header(header: &str) {
        println!("\n{}", header.bold());
    }

    pub fn dry_run_notice(message: &str) {
        println!("{}", format!("[DRY RUN] {}", message).yellow());
    }

    /// Progress bar over a number of tasks.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use rulemover::output::OutputFormatter;
    /// let pb = OutputFormatter::create_progress_bar(3);
    /// pb.inc(1);
    /// pb.finish_with_message("done");
    /// ```
    pub fn create_progress_bar(total: u64) -> ProgressBar {
        let pb = ProgressBar::new(total);
        if let Ok(style) =
            ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("█▓░"));
        }
        pb
    }

    /// Spinner counting files as a single task runs.
    pub fn create_spinner() -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {pos} files {msg}") {
            spinner.set_style(style);
        }
        spinner
    }

    fn status_label(status: RunStatus) -> ColoredString {
        let label = status.to_string();
        match status {
            RunStatus::Succeeded => label.green(),
            RunStatus::PartiallyFailed => label.yellow(),
            RunStatus::Failed => label.red(),
            RunStatus::Idle | RunStatus::Running => label.normal(),
        }
    }

    /// Prints the task list.
    pub fn task_table(tasks: &[(TaskRecord, RunStatus)]) {
        Self::header("TASKS");
        if tasks.is_empty() {
            println!("No tasks configured.");
            return;
        }
        for (task, status) in tasks {
            let active = if task.is_active {
                "active".green()
            } else {
                "disabled".dimmed()
            };
            println!(
                "{:>4}  .{:<8} {} → {}  [{}] {}",
                task.id,
                task.extension,
                task.source.display(),
                task.destination.display(),
                active,
                Self::status_label(*status)
            );
        }
    }

    /// Prints the per-task counters with a total row.
    pub fn stats_table(stats: &[Stats]) {
        Self::header("STATS");
        println!(
            "{:>4} | {:>8} | {:>12} | {:>8}",
            "Task".bold(),
            "Moved".bold(),
            "Bytes".bold(),
            "Failures".bold()
        );
        println!("{}", "-".repeat(42));
        for s in stats {
            println!(
                "{:>4} | {:>8} | {:>12} | {:>8}",
                s.task_id,
                s.files_moved.to_string().green(),
                s.bytes_moved,
                if s.failures == 0 {
                    s.failures.to_string().normal()
                } else {
                    s.failures.to_string().red()
                }
            );
        }
        println!("{}", "-".repeat(42));
        let (files, bytes, failures) = stats.iter().fold((0, 0, 0), |acc, s| {
            (acc.0 + s.files_moved, acc.1 + s.bytes_moved, acc.2 + s.failures)
        });
        println!(
            "{:>4} | {:>8} | {:>12} | {:>8}",
            "All".bold(),
            files.to_string().green().bold(),
            bytes,
            failures
        );
    }

    /// Prints what happened in one run.
    pub fn run_summary(task_id: TaskId, trigger: &Result<RunTrigger>) {
        match trigger {
            Ok(RunTrigger::Completed(report)) => Self::report(report),
            Ok(RunTrigger::AlreadyRunning) => {
                Self::warning(&format!("Task {} is already running", task_id))
            }
            Ok(RunTrigger::Inactive) => Self::info(&format!("Task {} is disabled", task_id)),
            Err(e) => Self::error(&format!("Task {}: {}", task_id, e)),
        }
    }

    fn report(report: &RunReport) {
        println!(
            "\nTask {}: {} ({} moved, {} failed{})",
            report.task_id,
            Self::status_label(report.status),
            report.successes(),
            report.failures(),
            if report.cancelled { ", cancelled" } else { "" }
        );
        if let Some(failure) = &report.setup_failure {
            Self::error(&failure.message);
        }
        for outcome in &report.outcomes {
            let name = outcome.candidate.file_name();
            match &outcome.result {
                MoveResult::Success { destination, .. } => {
                    println!("   {} {} → {}", "✓".green(), name, destination.display())
                }
                MoveResult::Skipped(reason) => {
                    println!("   {} {} skipped: {:?}", "-".yellow(), name, reason)
                }
                MoveResult::Failed(kind) => println!("   {} {}: {}", "✗".red(), name, kind),
            }
        }
    }

    pub fn plan(task: &TaskRecord, plan: &[PlannedMove]) {
        Self::dry_run_notice(&format!(
            "Task {}: .{} files in {}",
            task.id,
            task.extension,
            task.source.display()
        ));
        if plan.is_empty() {
            println!("   No files found to move.");
        }
        for planned in plan {
            let name = planned.candidate.file_name();
            match &planned.action {
                PlannedAction::Move(target) => {
                    println!("   → Would move {} to {}", name, target.display())
                }
                PlannedAction::Reject(kind) => {
                    println!("   {} Would not move {}: {}", "✗".red(), name, kind)
                }
            }
        }
    }

    pub fn errors(messages: &[UserFacingMessage]) {
        Self::header("RECENT ERRORS");
        if messages.is_empty() {
            println!("No errors recorded.");
        }
        for message in messages {
            println!(
                "{} [{}] {}",
                message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                message.kind.label().red(),
                message
            );
        }
    }
}
