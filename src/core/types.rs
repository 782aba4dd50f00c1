//! Core identifier types for the pipeline.
//!
//! These types provide type-safe identifiers for task kinds, task instances,
//! pipeline runs, and the result tables a task writes into.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// The kinds of task the pipeline knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Materialises the upstream port mapping and registers targets.
    Targets,
    /// Service detection scan, one invocation per target and protocol.
    Nmap,
    /// Exploit lookup against each service scan artifact.
    Searchsploit,
}

/// Returned when a string does not name a known task kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown task kind '{0}' (expected one of: targets, nmap, searchsploit)")]
pub struct UnknownTaskKind(pub String);

impl TaskKind {
    /// Every task kind, ordered root to leaf.
    pub const ALL: [TaskKind; 3] = [TaskKind::Targets, TaskKind::Nmap, TaskKind::Searchsploit];

    /// Get the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Targets => "targets",
            TaskKind::Nmap => "nmap",
            TaskKind::Searchsploit => "searchsploit",
        }
    }

    /// Name of the output directory under the results root.
    pub fn results_dir_name(&self) -> String {
        format!("{}-results", self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = UnknownTaskKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "targets" | "target-list" => Ok(TaskKind::Targets),
            "nmap" | "service-scan" => Ok(TaskKind::Nmap),
            "searchsploit" | "exploit-lookup" => Ok(TaskKind::Searchsploit),
            other => Err(UnknownTaskKind(other.to_string())),
        }
    }
}

/// Identity of one task instance: its kind plus its resolved parameters.
///
/// Two instances with the same kind and parameter values share a key, which
/// is what completion markers are recorded against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey(String);

impl InstanceKey {
    /// Build a key from a kind and its parameters.
    ///
    /// Parameters are rendered in key order so the result is stable.
    pub fn new(kind: TaskKind, params: &BTreeMap<&'static str, String>) -> Self {
        let rendered: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        Self(format!("{}({})", kind.as_str(), rendered.join(",")))
    }

    /// Wrap an already rendered key (e.g. one read back from storage).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Get the underlying string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Unique identifier for a single pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    /// Generate a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

/// Result tables in the target store that carry monotonic ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultTable {
    Targets,
    ScanResults,
    ExploitMatches,
}

impl ResultTable {
    /// SQL table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultTable::Targets => "targets",
            ResultTable::ScanResults => "scan_results",
            ResultTable::ExploitMatches => "exploit_matches",
        }
    }

    /// Parse a table name as stored in a completion marker.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "targets" => Some(ResultTable::Targets),
            "scan_results" => Some(ResultTable::ScanResults),
            "exploit_matches" => Some(ResultTable::ExploitMatches),
            _ => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
