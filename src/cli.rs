//! Command-line interface.
//!
//! Parses arguments with clap, assembles an [`Engine`] from the configuration, and
//! executes one command against it.

use crate::config::AppConfig;
use crate::engine::{Engine, RunTrigger};
use crate::error::{Error, Result};
use crate::mover::CancelToken;
use crate::output::OutputFormatter;
use crate::rule::Rule;
use crate::task_store::{RunStatus, TaskId};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "rulemover", version, about = "Move files by extension according to rules")]
pub struct Cli {
    /// Configuration file (default: .rulemoverc.toml, then ~/.config/rulemover/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one task, or every active task
    Run {
        /// Task id; all active tasks when omitted
        #[arg(short, long)]
        task: Option<TaskId>,
        /// Show what would be moved without moving anything
        #[arg(long)]
        dry_run: bool,
    },
    /// List tasks
    Tasks,
    /// Add a rule
    Add {
        /// File extension, e.g. pdf
        #[arg(long = "ext")]
        extension: String,
        /// Absolute source directory
        #[arg(long = "from")]
        source: PathBuf,
        /// Absolute destination directory
        #[arg(long = "to")]
        destination: PathBuf,
    },
    /// Remove a task and its rule
    Remove { task: TaskId },
    /// Enable a task
    Enable { task: TaskId },
    /// Disable a task
    Disable { task: TaskId },
    /// Show moved-file statistics
    Stats,
    /// Reset statistics for one task, or all
    ResetStats { task: Option<TaskId> },
    /// Show recent errors
    Errors,
}

/// Loads configuration, assembles the engine and runs `command`.
pub fn run_cli(cli: Cli) -> Result<()> {
    let config = AppConfig::load(cli.config.as_deref())?;
    let engine = Engine::assemble(&config)?;
    execute(&engine, cli.command)
}

/// Executes one command against an assembled engine.
pub fn execute(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Run { task, dry_run } if dry_run => dry_run_tasks(engine, task),
        Command::Run { task, .. } => run_tasks(engine, task),
        Command::Tasks => {
            let rows: Vec<_> = engine
                .tasks()
                .into_iter()
                .map(|t| {
                    let status = engine.task_status(t.id).unwrap_or(RunStatus::Idle);
                    (t, status)
                })
                .collect();
            OutputFormatter::task_table(&rows);
            Ok(())
        }
        Command::Add {
            extension,
            source,
            destination,
        } => {
            let task = engine.add_rule(Rule::new(&extension, source, destination)?)?;
            OutputFormatter::success(&format!("Added task {} for .{} files", task.id, task.extension));
            Ok(())
        }
        Command::Remove { task } => {
            engine.remove_task(task)?;
            OutputFormatter::success(&format!("Removed task {}", task));
            Ok(())
        }
        Command::Enable { task } => toggle(engine, task, true),
        Command::Disable { task } => toggle(engine, task, false),
        Command::Stats => {
            OutputFormatter::stats_table(&engine.all_stats());
            Ok(())
        }
        Command::ResetStats { task } => {
            engine.reset_stats(task)?;
            OutputFormatter::success("Statistics reset");
            Ok(())
        }
        Command::Errors => {
            OutputFormatter::errors(&engine.recent_errors());
            Ok(())
        }
    }
}

fn toggle(engine: &Engine, task: TaskId, active: bool) -> Result<()> {
    engine.set_task_active(task, active)?;
    OutputFormatter::success(&format!(
        "Task {} {}",
        task,
        if active { "enabled" } else { "disabled" }
    ));
    Ok(())
}

fn run_tasks(engine: &Engine, task: Option<TaskId>) -> Result<()> {
    let cancel = CancelToken::new();
    let results = match task {
        Some(id) => {
            let spinner = OutputFormatter::create_spinner();
            spinner.set_message(format!("running task {}", id));
            let result = engine.run_task_with(id, &cancel, |outcome| {
                spinner.set_message(outcome.candidate.file_name());
                spinner.inc(1);
            });
            spinner.finish_and_clear();
            vec![(id, result)]
        }
        None => {
            let active = engine.tasks().iter().filter(|t| t.is_active).count();
            if active == 0 {
                OutputFormatter::info("No active tasks to run.");
                return Ok(());
            }
            let pb = OutputFormatter::create_progress_bar(active as u64);
            pb.set_message("running tasks");
            let results = engine.run_all_with(&cancel, |id, _| {
                pb.set_message(format!("task {} done", id));
                pb.inc(1);
            });
            pb.finish_and_clear();
            results
        }
    };

    let mut failed = 0;
    for (id, result) in &results {
        OutputFormatter::run_summary(*id, result);
        let ok = match result {
            Ok(RunTrigger::Completed(report)) => report.status != RunStatus::Failed,
            Ok(_) => true,
            Err(_) => false,
        };
        if !ok {
            failed += 1;
        }
    }

    if failed > 0 {
        OutputFormatter::warning(&format!(
            "{} task(s) failed. Run 'rulemover errors' for details.",
            failed
        ));
    }
    // A single explicitly requested task that could not even be found is an error.
    if let (Some(_), Some((_, Err(e)))) = (task, results.into_iter().next()) {
        return Err(e);
    }
    Ok(())
}

fn dry_run_tasks(engine: &Engine, task: Option<TaskId>) -> Result<()> {
    let tasks = match task {
        Some(id) => vec![engine.task(id)?],
        None => engine.tasks().into_iter().filter(|t| t.is_active).collect(),
    };
    for task in tasks {
        match engine.plan_task(task.id) {
            Ok(plan) => OutputFormatter::plan(&task, &plan),
            Err(Error::NoFileFound { path }) => OutputFormatter::error(&format!(
                "Task {}: source {} does not exist",
                task.id,
                path.display()
            )),
            Err(e) => return Err(e),
        }
    }
    OutputFormatter::success("Dry run complete. No files were modified.");
    Ok(())
}
