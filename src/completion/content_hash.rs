//! Completion by output directory digest.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use super::{Baseline, CompletionKind, CompletionStrategy};
use crate::core::task::{ArtifactRef, InstanceRef, TaskError};
use crate::storage::TargetStore;

/// File written into the output directory holding its digest.
pub const MARKER_FILE: &str = ".complete.sha256";

/// Complete when the output directory still hashes to the digest written
/// by `mark_complete`.
///
/// An empty or half-written directory left by an interrupted run has no
/// marker, and a directory edited after completion no longer matches it, so
/// both re-run.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHash;

/// Digest of every regular file under `dir` except the marker, keyed by
/// relative path so the result does not depend on traversal order.
pub(crate) fn digest_dir(dir: &Path) -> Result<String, TaskError> {
    let pattern = dir.join("**").join("*").to_string_lossy().to_string();
    let paths = glob::glob(&pattern).map_err(|e| {
        TaskError::io(dir, io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))
    })?;

    let mut file_hashes: BTreeMap<String, String> = BTreeMap::new();
    for entry in paths {
        let path = entry.map_err(|e| TaskError::io(dir, e.into_error()))?;
        if !path.is_file() || path.file_name().is_some_and(|n| n == MARKER_FILE) {
            continue;
        }
        let contents = fs::read(&path).map_err(|e| TaskError::io(&path, e))?;
        let relative = path
            .strip_prefix(dir)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();
        file_hashes.insert(relative, format!("{:x}", Sha256::digest(&contents)));
    }

    let mut hasher = Sha256::new();
    for (path, hash) in &file_hashes {
        hasher.update(path.as_bytes());
        hasher.update(b":");
        hasher.update(hash.as_bytes());
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[async_trait]
impl CompletionStrategy for ContentHash {
    fn kind(&self) -> CompletionKind {
        CompletionKind::ContentHash
    }

    async fn is_complete(
        &self,
        instance: &InstanceRef,
        _store: &dyn TargetStore,
    ) -> Result<bool, TaskError> {
        if !instance.dir.is_dir() {
            return Ok(false);
        }
        let marker = instance.dir.join(MARKER_FILE);
        let recorded = match tokio::fs::read_to_string(&marker).await {
            Ok(recorded) => recorded,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(TaskError::io(&marker, e)),
        };
        Ok(recorded.trim() == digest_dir(&instance.dir)?)
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
        instance: &InstanceRef,
        _store: &dyn TargetStore,
    ) -> Result<Baseline, TaskError> {
        // A stale marker from an earlier run must not survive a failed rerun.
        let marker = instance.dir.join(MARKER_FILE);
        match tokio::fs::remove_file(&marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(TaskError::io(&marker, e)),
        }
        Ok(Baseline::none())
    }

    async fn mark_complete(
        &self,
        instance: &InstanceRef,
        _baseline: Baseline,
        _store: &dyn TargetStore,
    ) -> Result<ArtifactRef, TaskError> {
        tokio::fs::create_dir_all(&instance.dir)
            .await
            .map_err(|e| TaskError::io(&instance.dir, e))?;
        let digest = digest_dir(&instance.dir)?;
        let marker = instance.dir.join(MARKER_FILE);
        tokio::fs::write(&marker, digest)
            .await
            .map_err(|e| TaskError::io(&marker, e))?;
        Ok(ArtifactRef::Directory(instance.dir.clone()))
    }
}
