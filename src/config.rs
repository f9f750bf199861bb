//! Configuration loading.
//!
//! Configuration is TOML:
//!
//! ```toml
//! [storage]
//! data_dir = "~/.local/share/rulemover"
//!
//! [scan]
//! include_hidden = false
//! exclude = ["*.part", "*.crdownload"]
//!
//! [reporting]
//! max_errors = 50
//!
//! [[rules]]
//! extension = "pdf"
//! source = "~/Downloads"
//! destination = "~/Documents/PDF"
//! ```
//!
//! Every section is optional. Without `data_dir` the stores live in memory only.

use crate::error::{Error, Result};
use crate::reporting::DEFAULT_CAPACITY;
use crate::rule::Rule;
use crate::scanner::ScanFilter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LOCAL_CONFIG_FILE: &str = ".rulemoverc.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the `rules`, `tasks` and `stats` tables.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Whether dot-files are candidates. Defaults to false.
    #[serde(default)]
    pub include_hidden: bool,
    /// Glob patterns matched against file names; matches are never moved.
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_max_errors")]
    pub max_errors: usize,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            max_errors: default_max_errors(),
        }
    }
}

fn default_max_errors() -> usize {
    DEFAULT_CAPACITY
}

/// A rule as written in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub extension: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl AppConfig {
    /// Loads configuration, trying in order:
    /// 1. `config_path`, if given
    /// 2. `.rulemoverc.toml` in the current directory
    /// 3. `~/.config/rulemover/config.toml`
    /// 4. built-in defaults
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an explicitly given file is missing, or if any file
    /// found cannot be read or parsed.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local_config = PathBuf::from(LOCAL_CONFIG_FILE);
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(home_config) = home_dir().map(|h| h.join(".config/rulemover/config.toml"))
            && home_config.exists()
        {
            return Self::load_from_file(&home_config);
        }

        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), rules = config.rules.len(), "loaded configuration");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn data_dir(&self) -> Option<PathBuf> {
        self.storage.data_dir.as_deref().map(expand_home)
    }

    pub fn scan_filter(&self) -> Result<ScanFilter> {
        ScanFilter::new(self.scan.include_hidden, &self.scan.exclude)
    }

    /// Builds the configured rules, expanding `~` in their paths.
    pub fn rules(&self) -> Result<Vec<Rule>> {
        self.rules
            .iter()
            .map(|r| {
                Rule::new(
                    &r.extension,
                    expand_home(&r.source),
                    expand_home(&r.destination),
                )
            })
            .collect()
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Replaces a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), home_dir()) {
        (Ok(rest), Some(home)) => home.join(rest),
        _ => path.to_path_buf(),
    }
}
