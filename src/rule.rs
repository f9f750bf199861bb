//! Organization rules and the store that holds them.
//!
//! A [`Rule`] maps one file extension in one source directory to a destination
//! directory. At most one *active* rule may exist per extension+source pair; a second
//! one is rejected with [`Error::DuplicateRule`] when it is added, updated or
//! re-enabled.

use crate::error::{Error, Result};
use crate::storage::{self, RULES_SCHEMA, Row, Schema, Table};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

pub type RuleId = u64;

/// A user-authored organization policy: `extension` files in `source` go to `destination`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub extension: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl Rule {
    /// Builds a rule, normalizing the extension (`".PDF"` becomes `"pdf"`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] if the extension is empty, either path is
    /// relative, or source and destination are the same directory.
    pub fn new(
        extension: &str,
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Result<Self> {
        let extension = normalize_extension(extension);
        if extension.is_empty() {
            return Err(Error::InvalidRule("extension must not be empty".to_string()));
        }
        if extension.contains(['/', '\\']) {
            return Err(Error::InvalidRule(format!(
                "extension '{}' contains a path separator",
                extension
            )));
        }

        let source = source.into();
        let destination = destination.into();
        for (label, path) in [("source", &source), ("destination", &destination)] {
            if !path.is_absolute() {
                return Err(Error::InvalidRule(format!(
                    "{} path {} is not absolute",
                    label,
                    path.display()
                )));
            }
        }
        if source == destination {
            return Err(Error::InvalidRule(format!(
                "source and destination are both {}",
                source.display()
            )));
        }

        Ok(Self {
            extension,
            source,
            destination,
        })
    }

    /// True when this rule competes with `other` for the same files.
    pub fn conflicts_with(&self, other: &Rule) -> bool {
        self.extension == other.extension && self.source == other.source
    }
}

/// Lowercases and strips leading dots and whitespace.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

/// A rule as held by the store, with its identity and activity flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleEntry {
    pub id: RuleId,
    pub rule: Rule,
    pub active: bool,
    /// The task materialized for this rule, once linked.
    pub task_id: Option<u64>,
}

impl Row for RuleEntry {
    const SCHEMA: Schema = RULES_SCHEMA;

    fn to_row(&self) -> Map<String, Value> {
        let mut row = Map::new();
        row.insert("id".into(), json!(self.id));
        row.insert("extension".into(), json!(self.rule.extension));
        row.insert(
            "source_path".into(),
            json!(self.rule.source.to_string_lossy()),
        );
        row.insert(
            "destination_path".into(),
            json!(self.rule.destination.to_string_lossy()),
        );
        row.insert("is_active".into(), json!(self.active));
        row.insert("task_id".into(), json!(self.task_id.unwrap_or(0)));
        row
    }

    fn from_row(row: &Map<String, Value>) -> Result<Self> {
        let rule = Rule::new(
            &storage::text(row, "extension"),
            storage::text(row, "source_path"),
            storage::text(row, "destination_path"),
        )?;
        let task_id = storage::integer(row, "task_id");
        Ok(Self {
            id: storage::integer(row, "id"),
            rule,
            active: storage::boolean(row, "is_active"),
            task_id: (task_id != 0).then_some(task_id),
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Inner {
    next_id: RuleId,
    entries: Vec<RuleEntry>,
}

/// Ordered collection of rules, optionally persisted to a `rules` table.
#[derive(Debug)]
pub struct RuleStore {
    inner: Mutex<Inner>,
    table: Option<Table>,
}

impl RuleStore {
    /// A store that lives only in memory.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                entries: Vec::new(),
            }),
            table: None,
        }
    }

    /// Opens (or creates) the persisted store inside `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self> {
        let table = Table::open(data_dir, RuleEntry::SCHEMA)?;
        let contents = table.load_contents::<RuleEntry>()?;
        debug!(rules = contents.rows.len(), next_id = contents.next_id, "opened rule store");
        Ok(Self {
            inner: Mutex::new(Inner {
                next_id: contents.next_id,
                entries: contents.rows,
            }),
            table: Some(table),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Applies `change` to a copy, persists it, then makes it current.
    fn commit<T>(&self, change: impl FnOnce(&mut Inner) -> Result<T>) -> Result<T> {
        let mut inner = self.lock();
        let mut staged = inner.clone();
        let value = change(&mut staged)?;
        if let Some(table) = &self.table {
            table.save_with_next_id(&staged.entries, staged.next_id)?;
        }
        *inner = staged;
        Ok(value)
    }

    fn check_duplicate(inner: &Inner, rule: &Rule, except: Option<RuleId>) -> Result<()> {
        let clash = inner
            .entries
            .iter()
            .any(|e| e.active && Some(e.id) != except && e.rule.conflicts_with(rule));
        if clash {
            return Err(Error::DuplicateRule {
                extension: rule.extension.clone(),
                source_dir: rule.source.clone(),
            });
        }
        Ok(())
    }

    /// Adds an active rule and returns its id.
    pub fn add(&self, rule: Rule) -> Result<RuleId> {
        let extension = rule.extension.clone();
        let id = self.commit(|inner| {
            Self::check_duplicate(inner, &rule, None)?;
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(RuleEntry {
                id,
                rule,
                active: true,
                task_id: None,
            });
            Ok(id)
        })?;
        info!(id, %extension, "rule added");
        Ok(id)
    }

    /// All rules in insertion order.
    pub fn list(&self) -> Vec<RuleEntry> {
        self.lock().entries.clone()
    }

    pub fn get(&self, id: RuleId) -> Result<RuleEntry> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or(Error::RuleNotFound(id))
    }

    /// Finds the rule linked to a task.
    pub fn find_by_task(&self, task_id: u64) -> Option<RuleEntry> {
        self.lock()
            .entries
            .iter()
            .find(|e| e.task_id == Some(task_id))
            .cloned()
    }

    /// Removes a rule, returning what was removed.
    pub fn remove(&self, id: RuleId) -> Result<RuleEntry> {
        let removed = self.commit(|inner| {
            let index = inner
                .entries
                .iter()
                .position(|e| e.id == id)
                .ok_or(Error::RuleNotFound(id))?;
            Ok(inner.entries.remove(index))
        })?;
        info!(id, "rule removed");
        Ok(removed)
    }

    /// Replaces a rule's definition, keeping its id, activity flag and task link.
    pub fn update(&self, id: RuleId, rule: Rule) -> Result<RuleEntry> {
        self.modify(id, |inner| {
            let active = Self::entry(inner, id)?.active;
            if active {
                Self::check_duplicate(inner, &rule, Some(id))?;
            }
            let entry = Self::entry_mut(inner, id)?;
            entry.rule = rule;
            Ok(())
        })
    }

    /// Enables or disables a rule. Enabling re-checks for duplicates.
    pub fn set_active(&self, id: RuleId, active: bool) -> Result<RuleEntry> {
        self.modify(id, |inner| {
            if active {
                let rule = Self::entry(inner, id)?.rule.clone();
                Self::check_duplicate(inner, &rule, Some(id))?;
            }
            Self::entry_mut(inner, id)?.active = active;
            Ok(())
        })
    }

    /// Records which task was materialized for a rule.
    pub fn link_task(&self, id: RuleId, task_id: u64) -> Result<RuleEntry> {
        self.modify(id, |inner| {
            Self::entry_mut(inner, id)?.task_id = Some(task_id);
            Ok(())
        })
    }

    /// Removes every rule. Ids keep counting up, across restarts too.
    pub fn clear(&self) -> Result<()> {
        self.commit(|inner| {
            inner.entries.clear();
            Ok(())
        })
    }

    fn modify(&self, id: RuleId, change: impl FnOnce(&mut Inner) -> Result<()>) -> Result<RuleEntry> {
        let entry = self.commit(|inner| {
            change(inner)?;
            Ok(Self::entry(inner, id)?.clone())
        })?;
        debug!(id, active = entry.active, "rule updated");
        Ok(entry)
    }

    fn entry(inner: &Inner, id: RuleId) -> Result<&RuleEntry> {
        inner
            .entries
            .iter()
            .find(|e| e.id == id)
            .ok_or(Error::RuleNotFound(id))
    }

    fn entry_mut(inner: &mut Inner, id: RuleId) -> Result<&mut RuleEntry> {
        inner
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::RuleNotFound(id))
    }
}
