//! Dependency chain resolution.
//!
//! Every task names at most one upstream task, so the requested instance
//! and its ancestors form a linear chain. [`TaskChain::resolve`] walks
//! `requires()` from the requested leaf back to the root and returns the
//! instances in execution order.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::task::ReconTask;
use super::types::{InstanceKey, TaskKind, UnknownTaskKind};

/// Errors that can occur while resolving a chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// An instance appeared twice while walking upstream.
    #[error("cycle detected at {kind} instance {instance}")]
    CycleDetected {
        kind: TaskKind,
        instance: InstanceKey,
    },

    /// The requested task kind does not exist.
    #[error(transparent)]
    UnknownKind(#[from] UnknownTaskKind),
}

/// A resolved dependency chain, root first.
#[derive(Clone)]
pub struct TaskChain {
    tasks: Vec<Arc<dyn ReconTask>>,
}

impl TaskChain {
    /// Resolve the chain ending in `leaf`.
    pub fn resolve(leaf: Arc<dyn ReconTask>) -> Result<Self, ChainError> {
        let mut seen: HashSet<InstanceKey> = HashSet::new();
        let mut tasks = Vec::new();
        let mut next = Some(leaf);

        while let Some(task) = next {
            let key = task.instance_key();
            if !seen.insert(key.clone()) {
                return Err(ChainError::CycleDetected {
                    kind: task.kind(),
                    instance: key,
                });
            }
            next = task.requires();
            tasks.push(task);
        }

        tasks.reverse();
        Ok(Self { tasks })
    }

    /// Number of instances in the chain.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the chain is empty (never true for a resolved chain).
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Instances in execution order, root first.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ReconTask>> {
        self.tasks.iter()
    }

    /// The requested instance.
    pub fn leaf(&self) -> Option<&Arc<dyn ReconTask>> {
        self.tasks.last()
    }

    /// Keys of every instance after position `index`, i.e. its dependents.
    pub fn dependents_of(&self, index: usize) -> Vec<InstanceKey> {
        self.tasks
            .iter()
            .skip(index + 1)
            .map(|t| t.instance_key())
            .collect()
    }

    /// Kinds in execution order.
    pub fn kinds(&self) -> Vec<TaskKind> {
        self.tasks.iter().map(|t| t.kind()).collect()
    }
}
