//! Completion tracking.
//!
//! A completion strategy decides whether a task instance already produced
//! its output, so re-running the pipeline skips satisfied work. Strategies
//! are pluggable per task kind:
//!
//! - [`ArtifactExists`]: the output directory exists.
//! - [`HighWaterMark`]: a marker row records the result table's highest id
//!   before and after the instance ran.
//! - [`ContentHash`]: the output directory exists and still hashes to the
//!   digest recorded when the instance finished.

mod artifact;
mod content_hash;
mod watermark;

pub use artifact::ArtifactExists;
pub use content_hash::{ContentHash, MARKER_FILE};
pub use watermark::HighWaterMark;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::core::task::{ArtifactRef, InstanceRef, TaskError};
use crate::storage::TargetStore;

/// Selects a completion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionKind {
    /// Output directory existence (default).
    #[default]
    Artifact,
    /// Result table id high-water-mark.
    HighWaterMark,
    /// Output directory content digest.
    ContentHash,
}

impl CompletionKind {
    /// Build the strategy this kind names.
    pub fn strategy(&self) -> Arc<dyn CompletionStrategy> {
        match self {
            CompletionKind::Artifact => Arc::new(ArtifactExists),
            CompletionKind::HighWaterMark => Arc::new(HighWaterMark),
            CompletionKind::ContentHash => Arc::new(ContentHash),
        }
    }
}

impl fmt::Display for CompletionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CompletionKind::Artifact => "artifact",
            CompletionKind::HighWaterMark => "high_water_mark",
            CompletionKind::ContentHash => "content_hash",
        };
        write!(f, "{}", name)
    }
}

/// State captured before an instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Baseline {
    /// Highest result id observed before the run, 0 when not tracked.
    pub highest_id: i64,
}

impl Baseline {
    /// A baseline that tracks nothing.
    pub fn none() -> Self {
        Self::default()
    }

    /// A baseline at `highest_id`.
    pub fn at(highest_id: i64) -> Self {
        Self { highest_id }
    }
}

/// Decides and records whether a task instance is complete.
#[async_trait]
pub trait CompletionStrategy: Send + Sync {
    /// Which strategy this is.
    fn kind(&self) -> CompletionKind;

    /// Whether the instance's output already exists.
    async fn is_complete(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<bool, TaskError>;

    /// Output reference recorded for an instance that is already complete.
    async fn recorded_output(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError>;

    /// Capture state before the instance runs.
    async fn mark_start(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<Baseline, TaskError>;

    /// Record completion after a successful run and return the output reference.
    async fn mark_complete(
        &self,
        instance: &InstanceRef,
        baseline: Baseline,
        store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError>;
}
