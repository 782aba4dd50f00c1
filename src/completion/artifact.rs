//! Completion by output directory existence.

use async_trait::async_trait;

use super::{Baseline, CompletionKind, CompletionStrategy};
use crate::core::task::{ArtifactRef, InstanceRef, TaskError};
use crate::storage::TargetStore;

/// Complete when the output directory exists.
///
/// Contents are not inspected. The engine removes a directory created by a
/// failed run, but a process killed mid-run can leave one behind that counts
/// as complete. Use [`super::ContentHash`] where that matters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArtifactExists;

#[async_trait]
impl CompletionStrategy for ArtifactExists {
    fn kind(&self) -> CompletionKind {
        CompletionKind::Artifact
    }

    async fn is_complete(
        &self,
        instance: &InstanceRef,
        _store: &dyn TargetStore,
    ) -> Result<bool, TaskError> {
        match tokio::fs::metadata(&instance.dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(TaskError::io(&instance.dir, e)),
        }
    }

    async fn recorded_output(
        &self,
        instance: &InstanceRef,
        _store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError> {
        Ok(ArtifactRef::Directory(instance.dir.clone()))
    }

    async fn mark_start(
        &self,
        _instance: &InstanceRef,
        _store: &dyn TargetStore,
    ) -> Result<Baseline, TaskError> {
        Ok(Baseline::none())
    }

    async fn mark_complete(
        &self,
        instance: &InstanceRef,
        _baseline: Baseline,
        _store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError> {
        // mkdir -p semantics: an existing directory is fine.
        tokio::fs::create_dir_all(&instance.dir)
            .await
            .map_err(|e| TaskError::io(&instance.dir, e))?;
        Ok(ArtifactRef::Directory(instance.dir.clone()))
    }
}
