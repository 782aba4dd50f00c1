//! Task trait and error types.
//!
//! A [`ReconTask`] is one parameter-bound step of the pipeline chain. It
//! names its single upstream dependency, where its output lives, and how to
//! produce that output.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::types::{InstanceKey, ResultTable, RunId, TaskKind};
use crate::completion::CompletionKind;
use crate::config::ToolPaths;
use crate::events::{Event, EventBus};
use crate::execution::{DispatchError, ToolInvoker};
use crate::parse::{MalformedLinePolicy, ParseError};
use crate::storage::{StoreError, TargetStore};

/// Errors that fail a task instance.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A parameter could not be coerced to the type the task needs.
    #[error("invalid value for parameter '{param}': {reason}")]
    Configuration { param: &'static str, reason: String },

    /// The upstream instance's output is missing.
    #[error("upstream output unavailable for {instance}: {reason}")]
    Dependency { instance: InstanceKey, reason: String },

    /// An input artifact exists but its contents are unusable.
    #[error("invalid input '{path}': {reason}")]
    InvalidInput { path: PathBuf, reason: String },

    /// Target store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Filesystem failure on an artifact.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record failed to parse under the fail-fast policy.
    #[error("malformed tool output: {0}")]
    MalformedRecord(#[from] ParseError),

    /// The dispatcher refused the batch.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// A completion marker would have moved backwards.
    #[error("completion marker for {key} regressed from {baseline} to {high}")]
    MarkerRegression {
        key: InstanceKey,
        baseline: i64,
        high: i64,
    },
}

impl TaskError {
    /// Build a configuration error for `param`.
    pub fn configuration(param: &'static str, reason: impl Into<String>) -> Self {
        TaskError::Configuration {
            param,
            reason: reason.into(),
        }
    }

    /// Build an invalid-input error for the artifact at `path`.
    pub fn invalid_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        TaskError::InvalidInput {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TaskError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reference to what a completed instance produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactRef {
    /// A directory of artifacts.
    Directory(PathBuf),
    /// Rows appended to `table` with ids above `since`.
    Rows { table: ResultTable, since: i64 },
}

/// Output of a completed instance, handed to its dependent as input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOutput {
    pub instance: InstanceKey,
    /// The instance's output directory (always present, even for row output).
    pub dir: PathBuf,
    pub artifact: ArtifactRef,
}

/// What a task needs in order to identify itself to a completion strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRef {
    pub key: InstanceKey,
    pub kind: TaskKind,
    pub dir: PathBuf,
    pub table: ResultTable,
}

/// Everything a running instance may touch.
pub struct TaskContext {
    pub run_id: RunId,
    /// Store session, valid for this instance only.
    pub store: Arc<dyn TargetStore>,
    /// Output of the upstream instance, if the task has one.
    pub input: Option<InstanceOutput>,
    pub invoker: Arc<dyn ToolInvoker>,
    pub tools: ToolPaths,
    pub malformed_lines: MalformedLinePolicy,
    pub events: Option<Arc<EventBus>>,
}

impl TaskContext {
    /// The upstream output directory, or a dependency error.
    pub fn input_dir(&self, instance: &InstanceKey) -> Result<&Path, TaskError> {
        self.input
            .as_ref()
            .map(|input| input.dir.as_path())
            .ok_or_else(|| TaskError::Dependency {
                instance: instance.clone(),
                reason: "no upstream output was provided".to_string(),
            })
    }

    /// Emit an event if a bus is attached.
    pub async fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event).await;
        }
    }
}

/// A step in the reconnaissance chain.
///
/// Implementations declare their parameters, their single upstream
/// dependency, and a `run` step. Completion tracking and store session
/// handling are the engine's job.
#[async_trait]
pub trait ReconTask: Send + Sync {
    /// The task kind.
    fn kind(&self) -> TaskKind;

    /// Resolved parameters, rendered for identity.
    fn params(&self) -> BTreeMap<&'static str, String>;

    /// The upstream instance this one depends on, or `None` for the root.
    fn requires(&self) -> Option<Arc<dyn ReconTask>>;

    /// Directory this instance writes its artifacts to.
    fn output_dir(&self) -> PathBuf;

    /// Store table this instance appends to.
    fn result_table(&self) -> ResultTable;

    /// Completion strategy used unless configuration overrides it.
    fn default_completion(&self) -> CompletionKind {
        CompletionKind::Artifact
    }

    /// Produce this instance's output.
    async fn run(&self, ctx: &mut TaskContext) -> Result<(), TaskError>;

    /// Identity of this instance.
    fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.kind(), &self.params())
    }

    /// Identity plus output location, for completion tracking.
    fn instance_ref(&self) -> InstanceRef {
        InstanceRef {
            key: self.instance_key(),
            kind: self.kind(),
            dir: self.output_dir(),
            table: self.result_table(),
        }
    }
}
