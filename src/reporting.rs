//! Turns failures into messages a person can read, and remembers the recent ones.
//!
//! With a data directory the log is kept in the `errors` table, so a later process
//! (for example `rulemover errors` after a `rulemover run`) sees the same entries.

use crate::error::{Error, ErrorKind, Result};
use crate::storage::{self, ERRORS_SCHEMA, Row, Schema, Table};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: usize = 50;

/// A renderable description of one failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserFacingMessage {
    pub kind: ErrorKind,
    pub text: String,
    /// What was being done when it failed, usually a path or task.
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for UserFacingMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            f.write_str(&self.text)
        } else {
            write!(f, "{} ({})", self.text, self.context)
        }
    }
}

impl Row for UserFacingMessage {
    const SCHEMA: Schema = ERRORS_SCHEMA;

    fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert(
            "kind".into(),
            json!(serde_json::to_string(&self.kind).unwrap_or_default()),
        );
        row.insert("text".into(), json!(self.text));
        row.insert("context".into(), json!(self.context));
        row.insert("timestamp".into(), json!(self.timestamp.to_rfc3339()));
        row
    }

    fn from_row(row: &Map<String, Value>) -> Result<Self> {
        let kind = serde_json::from_str(&storage::text(row, "kind"))
            .map_err(|e| Error::Storage(format!("table 'errors': invalid kind: {}", e)))?;
        let timestamp = DateTime::parse_from_rfc3339(&storage::text(row, "timestamp"))
            .map_err(|e| Error::Storage(format!("table 'errors': invalid timestamp: {}", e)))?
            .with_timezone(&Utc);
        Ok(Self {
            kind,
            text: storage::text(row, "text"),
            context: storage::text(row, "context"),
            timestamp,
        })
    }
}

/// Stable text for each error kind.
pub fn describe(kind: &ErrorKind) -> String {
    match kind {
        ErrorKind::NoFileFound => "The file or folder could not be found.".to_string(),
        ErrorKind::EmptyContent => "The file is empty and was not moved.".to_string(),
        ErrorKind::Permission => "Access to the file was denied.".to_string(),
        ErrorKind::DestinationUnwritable => {
            "The destination folder does not exist or cannot be written to.".to_string()
        }
        ErrorKind::DuplicateRule => {
            "A rule for this file type and source folder already exists.".to_string()
        }
        ErrorKind::UnknownIo { message, code } => match code {
            Some(code) => format!("Unexpected file system error (code {}): {}", code, message),
            None => format!("Unexpected error: {}", message),
        },
    }
}

/// Reports failures and keeps the last `capacity` of them, oldest evicted first.
#[derive(Debug)]
pub struct ErrorReporter {
    capacity: usize,
    recent: Mutex<VecDeque<UserFacingMessage>>,
    table: Option<Table>,
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ErrorReporter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            recent: Mutex::new(VecDeque::with_capacity(capacity)),
            table: None,
        }
    }

    /// Opens the persisted log inside `data_dir`, keeping its newest `capacity` entries.
    pub fn open(data_dir: &Path, capacity: usize) -> Result<Self> {
        let table = Table::open(data_dir, ERRORS_SCHEMA)?;
        let mut recent: VecDeque<UserFacingMessage> = table.load::<UserFacingMessage>()?.into();
        while recent.len() > capacity {
            recent.pop_front();
        }
        debug!(errors = recent.len(), "opened error log");
        Ok(Self {
            capacity,
            recent: Mutex::new(recent),
            table: Some(table),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<UserFacingMessage>> {
        self.recent.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes the log out. Failing to save is logged, never returned.
    fn persist(&self, recent: &VecDeque<UserFacingMessage>) {
        if let Some(table) = &self.table
            && let Err(e) = table.save(recent)
        {
            warn!(error = %e, "could not save error log");
        }
    }

    /// Records a failure of `kind` and returns its message. Never fails.
    pub fn report(&self, kind: &ErrorKind, context: &str) -> UserFacingMessage {
        let message = UserFacingMessage {
            kind: kind.clone(),
            text: describe(kind),
            context: context.to_string(),
            timestamp: Utc::now(),
        };
        warn!(kind = kind.label(), context, "{}", message.text);

        if self.capacity > 0 {
            let mut recent = self.lock();
            while recent.len() >= self.capacity {
                recent.pop_front();
            }
            recent.push_back(message.clone());
            self.persist(&recent);
        }
        message
    }

    /// Same as [`report`](Self::report) for a crate error.
    pub fn report_error(&self, error: &Error, context: &str) -> UserFacingMessage {
        self.report(&error.kind(), context)
    }

    /// The retained messages, oldest first.
    pub fn recent(&self) -> Vec<UserFacingMessage> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut recent = self.lock();
        recent.clear();
        self.persist(&recent);
    }
}
