//! Parameter sets passed down the task chain.
//!
//! Each task kind owns an explicit parameter struct holding exactly the
//! fields it reads. A child embeds its parent's struct, so it can always
//! rebuild the parent instance it depends on without re-declaring anything.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::task::TaskError;
use super::types::TaskKind;

/// Default worker count for tool dispatch.
pub const DEFAULT_THREADS: &str = "10";

/// Parameters of the chain root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetListParams {
    /// Upstream port mapping artifact (`{address: {protocol: [ports]}}`).
    pub target_file: PathBuf,
    /// Directory every task writes its `<kind>-results/` folder under.
    pub results_dir: PathBuf,
    /// Target store location.
    pub db_location: PathBuf,
}

impl TargetListParams {
    /// Output directory for a task kind under this results root.
    pub fn output_dir(&self, kind: TaskKind) -> PathBuf {
        self.results_dir.join(kind.results_dir_name())
    }

    /// Parameters as rendered strings, for instance identity.
    pub fn describe(&self) -> BTreeMap<&'static str, String> {
        let mut params = BTreeMap::new();
        params.insert("target_file", display(&self.target_file));
        params.insert("results_dir", display(&self.results_dir));
        params.insert("db_location", display(&self.db_location));
        params
    }
}

/// Parameters of the service scan: the root's plus a thread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceScanParams {
    #[serde(flatten)]
    pub targets: TargetListParams,
    /// Raw thread count; coerced when the instance runs.
    pub threads: String,
}

impl ServiceScanParams {
    /// Rebuild the parent's parameter set.
    pub fn upstream(&self) -> TargetListParams {
        self.targets.clone()
    }

    /// Coerce `threads` to a worker count.
    pub fn threads(&self) -> Result<usize, TaskError> {
        coerce_threads(&self.threads)
    }

    pub fn describe(&self) -> BTreeMap<&'static str, String> {
        let mut params = self.targets.describe();
        params.insert("threads", self.threads.trim().to_string());
        params
    }
}

/// Parameters of the exploit lookup. It reads nothing beyond what the scan
/// needs, but must forward all of it to rebuild its parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExploitLookupParams {
    #[serde(flatten)]
    pub scan: ServiceScanParams,
}

impl ExploitLookupParams {
    /// Rebuild the parent's parameter set.
    pub fn upstream(&self) -> ServiceScanParams {
        self.scan.clone()
    }

    pub fn describe(&self) -> BTreeMap<&'static str, String> {
        self.scan.describe()
    }
}

/// The flat parameter set a caller requests a task with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParams {
    pub target_file: PathBuf,
    pub results_dir: PathBuf,
    pub db_location: PathBuf,
    pub threads: String,
}

impl PipelineParams {
    /// Create a parameter set with the default thread count.
    pub fn new(
        target_file: impl Into<PathBuf>,
        results_dir: impl Into<PathBuf>,
        db_location: impl Into<PathBuf>,
    ) -> Self {
        Self {
            target_file: target_file.into(),
            results_dir: results_dir.into(),
            db_location: db_location.into(),
            threads: DEFAULT_THREADS.to_string(),
        }
    }

    /// Set the raw thread count.
    pub fn with_threads(mut self, threads: impl Into<String>) -> Self {
        self.threads = threads.into();
        self
    }

    pub fn target_list(&self) -> TargetListParams {
        TargetListParams {
            target_file: self.target_file.clone(),
            results_dir: self.results_dir.clone(),
            db_location: self.db_location.clone(),
        }
    }

    pub fn service_scan(&self) -> ServiceScanParams {
        ServiceScanParams {
            targets: self.target_list(),
            threads: self.threads.clone(),
        }
    }

    pub fn exploit_lookup(&self) -> ExploitLookupParams {
        ExploitLookupParams {
            scan: self.service_scan(),
        }
    }
}

/// Coerce a raw thread count to a positive worker count.
///
/// Anything other than a positive integer is a configuration error naming
/// `threads`; a pool of zero workers would never run anything.
pub fn coerce_threads(raw: &str) -> Result<usize, TaskError> {
    let value: usize = raw.trim().parse().map_err(|_| {
        TaskError::configuration("threads", format!("'{}' is not a non-negative integer", raw))
    })?;
    if value == 0 {
        return Err(TaskError::configuration(
            "threads",
            "must be at least 1 (a pool of zero workers never runs)",
        ));
    }
    Ok(value)
}

fn display(path: &Path) -> String {
    path.display().to_string()
}
