/// Table persistence for the rule, task, stats and error-log stores.
///
/// Each table has an explicit [`Schema`] (column names, types, key flags). Rows are
/// kept by the stores in memory and written through a [`Table`] as a pretty-printed
/// JSON document, one file per table. Loading validates every row against the schema
/// so a hand-edited or truncated file is reported instead of silently dropped.
///
/// Tables with an auto-increment key also store their sequence (`next_id`), so an id
/// freed by a delete is never handed out again, even after a restart.
use crate::error::{Error, Result};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Text,
    Boolean,
}

/// A single column definition.
#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnType,
    pub primary_key: bool,
    pub auto_increment: bool,
}

impl Column {
    const fn new(name: &'static str, kind: ColumnType) -> Self {
        Self {
            name,
            kind,
            primary_key: false,
            auto_increment: false,
        }
    }

    const fn id(name: &'static str) -> Self {
        Self {
            name,
            kind: ColumnType::Integer,
            primary_key: true,
            auto_increment: true,
        }
    }
}

/// Explicit table definition handed to the storage backend.
#[derive(Debug, Clone, Copy)]
pub struct Schema {
    pub table: &'static str,
    pub columns: &'static [Column],
}

impl Schema {
    /// The auto-increment primary key column, if any.
    pub fn auto_key(&self) -> Option<&'static str> {
        self.columns
            .iter()
            .find(|c| c.primary_key && c.auto_increment)
            .map(|c| c.name)
    }

    fn check_row(&self, row: &Map<String, Value>) -> Result<()> {
        for column in self.columns {
            let value = row.get(column.name).ok_or_else(|| {
                Error::Storage(format!(
                    "table '{}': missing column '{}'",
                    self.table, column.name
                ))
            })?;
            let ok = match column.kind {
                ColumnType::Integer => value.is_u64(),
                ColumnType::Text => value.is_string(),
                ColumnType::Boolean => value.is_boolean(),
            };
            if !ok {
                return Err(Error::Storage(format!(
                    "table '{}': column '{}' has wrong type ({})",
                    self.table, column.name, value
                )));
            }
        }
        Ok(())
    }
}

pub const TASKS_SCHEMA: Schema = Schema {
    table: "tasks",
    columns: &[
        Column::id("id"),
        Column::new("task_type", ColumnType::Text),
        Column::new("task_from", ColumnType::Text),
        Column::new("task_to", ColumnType::Text),
        Column::new("is_active", ColumnType::Boolean),
    ],
};

pub const STATS_SCHEMA: Schema = Schema {
    table: "stats",
    columns: &[
        Column {
            name: "task_id",
            kind: ColumnType::Integer,
            primary_key: true,
            auto_increment: false,
        },
        Column::new("files_moved", ColumnType::Integer),
        Column::new("bytes_moved", ColumnType::Integer),
        Column::new("failures", ColumnType::Integer),
    ],
};

pub const RULES_SCHEMA: Schema = Schema {
    table: "rules",
    columns: &[
        Column::id("id"),
        Column::new("extension", ColumnType::Text),
        Column::new("source_path", ColumnType::Text),
        Column::new("destination_path", ColumnType::Text),
        Column::new("is_active", ColumnType::Boolean),
        Column::new("task_id", ColumnType::Integer),
    ],
};

/// Bounded diagnostics log; rows are kept oldest first.
pub const ERRORS_SCHEMA: Schema = Schema {
    table: "errors",
    columns: &[
        Column::new("kind", ColumnType::Text),
        Column::new("text", ColumnType::Text),
        Column::new("context", ColumnType::Text),
        Column::new("timestamp", ColumnType::Text),
    ],
};

/// A record type that maps to and from a schema row.
pub trait Row: Sized {
    const SCHEMA: Schema;

    fn to_row(&self) -> Map<String, Value>;

    fn from_row(row: &Map<String, Value>) -> Result<Self>;
}

/// Reads a text column from a row that already passed schema validation.
pub(crate) fn text(row: &Map<String, Value>, column: &str) -> String {
    row.get(column)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn integer(row: &Map<String, Value>, column: &str) -> u64 {
    row.get(column).and_then(Value::as_u64).unwrap_or_default()
}

pub(crate) fn boolean(row: &Map<String, Value>, column: &str) -> bool {
    row.get(column).and_then(Value::as_bool).unwrap_or_default()
}

/// Everything read back from a table file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contents<R> {
    pub rows: Vec<R>,
    /// First id not yet handed out; 1 for an empty or key-less table.
    pub next_id: u64,
}

/// One JSON file holding every row of a table.
#[derive(Debug, Clone)]
pub struct Table {
    schema: Schema,
    path: PathBuf,
}

impl Table {
    /// Opens the table file for `schema` inside `data_dir`, creating the directory.
    pub fn open(data_dir: &Path, schema: Schema) -> Result<Self> {
        fs::create_dir_all(data_dir).map_err(|e| {
            Error::Storage(format!(
                "cannot create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;
        Ok(Self {
            schema,
            path: data_dir.join(format!("{}.json", schema.table)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads all rows. A missing file is an empty table.
    pub fn load<R: Row>(&self) -> Result<Vec<R>> {
        Ok(self.load_contents()?.rows)
    }

    /// Loads all rows together with the id sequence.
    ///
    /// The sequence is the stored `next_id`, raised past the largest key actually
    /// present so a file written without one still never yields a duplicate.
    pub fn load_contents<R: Row>(&self) -> Result<Contents<R>> {
        if !self.path.exists() {
            return Ok(Contents {
                rows: Vec::new(),
                next_id: 1,
            });
        }

        let content = fs::read_to_string(&self.path)
            .map_err(|e| Error::Storage(format!("cannot read {}: {}", self.path.display(), e)))?;
        let document: Value = serde_json::from_str(&content).map_err(|e| {
            Error::Storage(format!("JSON parse error in {}: {}", self.path.display(), e))
        })?;

        if document["table"].as_str() != Some(self.schema.table) {
            return Err(Error::Storage(format!(
                "{} does not hold table '{}'",
                self.path.display(),
                self.schema.table
            )));
        }

        let rows = document["rows"].as_array().ok_or_else(|| {
            Error::Storage(format!(
                "missing or invalid 'rows' field in {}",
                self.path.display()
            ))
        })?;

        let records = rows
            .iter()
            .map(|row| {
                let row = row.as_object().ok_or_else(|| {
                    Error::Storage(format!("table '{}': row is not an object", self.schema.table))
                })?;
                self.schema.check_row(row)?;
                R::from_row(row)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut next_id = document["next_id"].as_u64().unwrap_or(1).max(1);
        if let Some(key) = self.schema.auto_key() {
            let mut seen = HashSet::new();
            for row in rows {
                let id = row[key].as_u64().unwrap_or_default();
                if !seen.insert(id) {
                    return Err(Error::Storage(format!(
                        "table '{}': duplicate {} {}",
                        self.schema.table, key, id
                    )));
                }
                next_id = next_id.max(id + 1);
            }
        }

        debug!(table = self.schema.table, rows = records.len(), next_id, "loaded table");
        Ok(Contents {
            rows: records,
            next_id,
        })
    }

    /// Replaces the file contents with `rows`.
    ///
    /// Written to a sibling temp file first and renamed into place, so a crash never
    /// leaves a half-written table.
    pub fn save<'a, R: Row + 'a>(&self, rows: impl IntoIterator<Item = &'a R>) -> Result<()> {
        self.write(rows, None)
    }

    /// Like [`save`](Self::save), also recording the id sequence.
    pub fn save_with_next_id<'a, R: Row + 'a>(
        &self,
        rows: impl IntoIterator<Item = &'a R>,
        next_id: u64,
    ) -> Result<()> {
        self.write(rows, Some(next_id))
    }

    fn write<'a, R: Row + 'a>(
        &self,
        rows: impl IntoIterator<Item = &'a R>,
        next_id: Option<u64>,
    ) -> Result<()> {
        let columns: Vec<&str> = self.schema.columns.iter().map(|c| c.name).collect();
        let mut document = json!({
            "table": self.schema.table,
            "columns": columns,
            "rows": rows.into_iter().map(Row::to_row).collect::<Vec<_>>(),
        });
        if let Some(next_id) = next_id {
            document["next_id"] = json!(next_id);
        }

        let json_string = serde_json::to_string_pretty(&document)
            .map_err(|e| Error::Storage(format!("JSON serialization failed: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json_string)
            .and_then(|()| fs::rename(&tmp_path, &self.path))
            .map_err(|e| Error::Storage(format!("cannot write {}: {}", self.path.display(), e)))
    }
}
