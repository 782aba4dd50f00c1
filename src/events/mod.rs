//! Lifecycle events and event handling.
//!
//! The engine emits an event as each chain instance starts, is skipped as
//! already complete, completes, or fails; the dispatcher emits one per
//! finished tool invocation.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::{InstanceKey, RunId, TaskKind};

/// Lifecycle events emitted during a pipeline run.
#[derive(Debug, Clone)]
pub enum Event {
    /// An instance is about to be checked and, if needed, run.
    InstanceStarted {
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        timestamp: Instant,
    },

    /// An instance was already complete; nothing was invoked.
    InstanceSkipped {
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        timestamp: Instant,
    },

    /// An instance ran and recorded completion.
    InstanceCompleted {
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        duration: Duration,
        timestamp: Instant,
    },

    /// An instance failed; the run stops here.
    InstanceFailed {
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        error: String,
        timestamp: Instant,
    },

    /// One external tool invocation finished.
    InvocationFinished {
        label: String,
        /// `None` when the process never exited normally.
        exit_code: Option<i32>,
        success: bool,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::InstanceStarted { timestamp, .. } => *timestamp,
            Event::InstanceSkipped { timestamp, .. } => *timestamp,
            Event::InstanceCompleted { timestamp, .. } => *timestamp,
            Event::InstanceFailed { timestamp, .. } => *timestamp,
            Event::InvocationFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Instance the event is about, if any.
    pub fn instance(&self) -> Option<&InstanceKey> {
        match self {
            Event::InstanceStarted { instance, .. }
            | Event::InstanceSkipped { instance, .. }
            | Event::InstanceCompleted { instance, .. }
            | Event::InstanceFailed { instance, .. } => Some(instance),
            Event::InvocationFinished { .. } => None,
        }
    }

    pub fn instance_started(run_id: RunId, kind: TaskKind, instance: InstanceKey) -> Self {
        Event::InstanceStarted {
            run_id,
            kind,
            instance,
            timestamp: Instant::now(),
        }
    }

    pub fn instance_skipped(run_id: RunId, kind: TaskKind, instance: InstanceKey) -> Self {
        Event::InstanceSkipped {
            run_id,
            kind,
            instance,
            timestamp: Instant::now(),
        }
    }

    pub fn instance_completed(
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        duration: Duration,
    ) -> Self {
        Event::InstanceCompleted {
            run_id,
            kind,
            instance,
            duration,
            timestamp: Instant::now(),
        }
    }

    pub fn instance_failed(
        run_id: RunId,
        kind: TaskKind,
        instance: InstanceKey,
        error: String,
    ) -> Self {
        Event::InstanceFailed {
            run_id,
            kind,
            instance,
            error,
            timestamp: Instant::now(),
        }
    }

    pub fn invocation_finished(label: String, exit_code: Option<i32>, success: bool) -> Self {
        Event::InvocationFinished {
            label,
            exit_code,
            success,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
