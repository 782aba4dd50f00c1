//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::completion::CompletionKind;
use crate::core::types::TaskKind;
use crate::parse::MalformedLinePolicy;

/// Global configuration (recon.yaml).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconConfig {
    /// Root under which every `<kind>-results/` directory is created.
    pub results_dir: Option<PathBuf>,
    /// Target store location.
    pub db_location: Option<PathBuf>,
    /// Worker count for tool dispatch.
    pub threads: Option<usize>,
    /// Kill a tool invocation after this many seconds.
    pub invocation_timeout_secs: Option<u64>,
    /// What to do with malformed exploit lines.
    pub malformed_lines: MalformedLinePolicy,
    /// External tool locations.
    pub tools: ToolPaths,
    /// Completion strategy overrides by task kind.
    pub completion: BTreeMap<TaskKind, CompletionKind>,
    /// Store backend.
    pub storage: StorageConfig,
}

impl ReconConfig {
    /// Invocation timeout as a duration.
    pub fn invocation_timeout(&self) -> Option<Duration> {
        self.invocation_timeout_secs.map(Duration::from_secs)
    }
}

/// Executable locations of the wrapped tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub nmap: String,
    pub searchsploit: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            nmap: "nmap".to_string(),
            searchsploit: "searchsploit".to_string(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory store; nothing survives the process.
    Memory,
    /// SQLite database at `db_location`.
    #[default]
    Sqlite,
}
