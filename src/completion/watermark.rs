//! Completion by result-table high-water-mark.

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{Baseline, CompletionKind, CompletionStrategy};
use crate::core::task::{ArtifactRef, InstanceRef, TaskError};
use crate::storage::{CompletionMarker, TargetStore};

/// Complete once a marker row has been persisted for the instance.
///
/// `mark_start` reads the highest id of the instance's result table;
/// `mark_complete` reads it again and persists both. The baseline is exposed
/// on the output as [`ArtifactRef::Rows`] so a consumer can scope queries to
/// rows added by this instance. Correlation itself does not filter by it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HighWaterMark;

#[async_trait]
impl CompletionStrategy for HighWaterMark {
    fn kind(&self) -> CompletionKind {
        CompletionKind::HighWaterMark
    }

    async fn is_complete(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<bool, TaskError> {
        Ok(store.get_marker(&instance.key).await?.is_some())
    }

    async fn recorded_output(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError> {
        let since = store
            .get_marker(&instance.key)
            .await?
            .map(|marker| marker.baseline_id)
            .unwrap_or_default();
        Ok(ArtifactRef::Rows {
            table: instance.table,
            since,
        })
    }

    async fn mark_start(
        &self,
        instance: &InstanceRef,
        store: &dyn TargetStore,
    ) -> Result<Baseline, TaskError> {
        let highest = store.highest_id(instance.table).await?;
        debug!(instance = %instance.key, table = %instance.table, highest, "Recorded baseline");
        Ok(Baseline::at(highest))
    }

    async fn mark_complete(
        &self,
        instance: &InstanceRef,
        baseline: Baseline,
        store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError> {
        let high = store.highest_id(instance.table).await?;
        if high < baseline.highest_id {
            return Err(TaskError::MarkerRegression {
                key: instance.key.clone(),
                baseline: baseline.highest_id,
                high,
            });
        }

        store
            .save_marker(CompletionMarker {
                key: instance.key.clone(),
                table: instance.table,
                baseline_id: baseline.highest_id,
                high_id: high,
                completed_at: Utc::now(),
            })
            .await?;

        Ok(ArtifactRef::Rows {
            table: instance.table,
            since: baseline.highest_id,
        })
    }
}
