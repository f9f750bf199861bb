//! rulemover - rule-driven file moving
//!
//! Rules map a file extension in a source directory to a destination directory.
//! Each rule is materialized as a task; running a task scans its source, validates
//! every matching file, and moves it without ever overwriting anything. Per-task
//! status, statistics and a bounded error log are kept along the way.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod mover;
pub mod output;
pub mod reporting;
pub mod rule;
pub mod scanner;
pub mod stats;
pub mod storage;
pub mod task_store;
pub mod validation;

pub use config::AppConfig;
pub use engine::{Engine, MainState, RunTrigger};
pub use error::{Error, ErrorKind, Result};
pub use mover::{CancelToken, FileMover, MoveOutcome, MoveResult, RunReport};
pub use rule::{Rule, RuleStore};
pub use stats::{Stats, StatsAggregator};
pub use task_store::{RunStatus, TaskRecord, TaskStore};
