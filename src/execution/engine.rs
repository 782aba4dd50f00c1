//! Chain execution.
//!
//! [`PipelineEngine::ensure_complete`] resolves the chain behind a requested
//! task and walks it root first. For each instance it opens a store
//! session, asks the completion strategy whether the instance already ran,
//! runs it if not, records completion, and closes the session on every exit
//! path. The first failing instance stops the walk; everything downstream
//! of it is reported as skipped and never attempted.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::command::ToolInvoker;
use crate::completion::CompletionKind;
use crate::config::ToolPaths;
use crate::core::chain::{ChainError, TaskChain};
use crate::core::task::{InstanceOutput, InstanceRef, ReconTask, TaskContext, TaskError};
use crate::core::types::{InstanceKey, RunId, TaskKind};
use crate::events::{Event, EventBus};
use crate::parse::MalformedLinePolicy;
use crate::storage::{StoreConnector, TargetStore};

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The chain could not be resolved.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// An instance failed; `skipped` lists the dependents never attempted.
    #[error("{kind} instance {instance} failed: {source}")]
    InstanceFailed {
        kind: TaskKind,
        instance: InstanceKey,
        #[source]
        source: TaskError,
        skipped: Vec<InstanceKey>,
    },
}

/// Engine-wide settings applied to every instance.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub tools: ToolPaths,
    pub malformed_lines: MalformedLinePolicy,
    /// Per-kind overrides of the task's default completion strategy.
    pub completion: BTreeMap<TaskKind, CompletionKind>,
}

impl EngineSettings {
    /// The strategy used for `task`.
    pub fn completion_for(&self, task: &dyn ReconTask) -> CompletionKind {
        self.completion
            .get(&task.kind())
            .copied()
            .unwrap_or_else(|| task.default_completion())
    }
}

/// How an instance was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    /// The instance ran in this pipeline run.
    Completed,
    /// The instance had already run; nothing was invoked.
    AlreadyComplete,
}

/// Per-instance entry of a [`PipelineReport`].
#[derive(Debug, Clone)]
pub struct InstanceReport {
    pub kind: TaskKind,
    pub instance: InstanceKey,
    pub status: InstanceStatus,
    pub output: InstanceOutput,
    pub duration: Duration,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: RunId,
    /// Instances in execution order, root first.
    pub instances: Vec<InstanceReport>,
}

impl PipelineReport {
    /// Output of the requested instance.
    pub fn output(&self) -> Option<&InstanceOutput> {
        self.instances.last().map(|r| &r.output)
    }

    /// Number of instances that ran in this run.
    pub fn executed(&self) -> usize {
        self.instances
            .iter()
            .filter(|r| r.status == InstanceStatus::Completed)
            .count()
    }
}

/// Completion state of one chain instance, without running anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub kind: TaskKind,
    pub instance: InstanceKey,
    pub completion: CompletionKind,
    pub complete: bool,
}

/// Drives task chains.
pub struct PipelineEngine {
    connector: Arc<dyn StoreConnector>,
    invoker: Arc<dyn ToolInvoker>,
    settings: EngineSettings,
    events: Option<Arc<EventBus>>,
}

impl PipelineEngine {
    /// Create an engine.
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        invoker: Arc<dyn ToolInvoker>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            connector,
            invoker,
            settings,
            events: None,
        }
    }

    /// Attach an event bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Make sure `leaf` and all of its ancestors are complete.
    pub async fn ensure_complete(
        &self,
        leaf: Arc<dyn ReconTask>,
    ) -> Result<PipelineReport, PipelineError> {
        let chain = TaskChain::resolve(leaf)?;
        let run_id = RunId::new();
        let mut input: Option<InstanceOutput> = None;
        let mut instances = Vec::with_capacity(chain.len());

        info!(run = %run_id, chain = ?chain.kinds(), "resolved task chain");

        for (index, task) in chain.iter().enumerate() {
            let kind = task.kind();
            let key = task.instance_key();
            let span = info_span!("pipeline_instance", kind = %kind, instance = %key);

            let start = Instant::now();
            self.emit(Event::instance_started(run_id, kind, key.clone()))
                .await;

            let outcome = self
                .run_instance(run_id, task.as_ref(), input.take())
                .instrument(span)
                .await;

            match outcome {
                Ok((status, output)) => {
                    let duration = start.elapsed();
                    match status {
                        InstanceStatus::AlreadyComplete => {
                            info!(kind = %kind, instance = %key, "already complete, skipping");
                            self.emit(Event::instance_skipped(run_id, kind, key.clone()))
                                .await;
                        }
                        InstanceStatus::Completed => {
                            info!(kind = %kind, instance = %key, elapsed = ?duration, "instance complete");
                            self.emit(Event::instance_completed(
                                run_id,
                                kind,
                                key.clone(),
                                duration,
                            ))
                            .await;
                        }
                    }
                    input = Some(output.clone());
                    instances.push(InstanceReport {
                        kind,
                        instance: key,
                        status,
                        output,
                        duration,
                    });
                }
                Err(source) => {
                    let skipped = chain.dependents_of(index);
                    error!(
                        kind = %kind,
                        instance = %key,
                        error = %source,
                        skipped = skipped.len(),
                        "instance failed"
                    );
                    self.emit(Event::instance_failed(
                        run_id,
                        kind,
                        key.clone(),
                        source.to_string(),
                    ))
                    .await;
                    return Err(PipelineError::InstanceFailed {
                        kind,
                        instance: key,
                        source,
                        skipped,
                    });
                }
            }
        }

        Ok(PipelineReport { run_id, instances })
    }

    /// Report the completion state of every instance in the chain.
    pub async fn plan(&self, leaf: Arc<dyn ReconTask>) -> Result<Vec<PlanEntry>, PipelineError> {
        let chain = TaskChain::resolve(leaf)?;
        let mut entries = Vec::with_capacity(chain.len());

        for task in chain.iter() {
            let completion = self.settings.completion_for(task.as_ref());
            let instance = task.instance_ref();
            let complete = self
                .check_instance(completion, &instance)
                .await
                .map_err(|source| PipelineError::InstanceFailed {
                    kind: instance.kind,
                    instance: instance.key.clone(),
                    source,
                    skipped: Vec::new(),
                })?;
            entries.push(PlanEntry {
                kind: instance.kind,
                instance: instance.key,
                completion,
                complete,
            });
        }
        Ok(entries)
    }

    async fn check_instance(
        &self,
        completion: CompletionKind,
        instance: &InstanceRef,
    ) -> Result<bool, TaskError> {
        let session = self.connector.open().await?;
        let complete = completion
            .strategy()
            .is_complete(instance, session.as_ref())
            .await;
        session.close().await;
        complete
    }

    /// Satisfy one instance inside its own store session.
    async fn run_instance(
        &self,
        run_id: RunId,
        task: &dyn ReconTask,
        input: Option<InstanceOutput>,
    ) -> Result<(InstanceStatus, InstanceOutput), TaskError> {
        let session = self.connector.open().await?;
        let result = self
            .drive_instance(run_id, task, input, Arc::clone(&session))
            .await;
        session.close().await;
        result
    }

    async fn drive_instance(
        &self,
        run_id: RunId,
        task: &dyn ReconTask,
        input: Option<InstanceOutput>,
        session: Arc<dyn TargetStore>,
    ) -> Result<(InstanceStatus, InstanceOutput), TaskError> {
        let strategy = self.settings.completion_for(task).strategy();
        let instance = task.instance_ref();

        if strategy.is_complete(&instance, session.as_ref()).await? {
            let artifact = strategy
                .recorded_output(&instance, session.as_ref())
                .await?;
            return Ok((
                InstanceStatus::AlreadyComplete,
                InstanceOutput {
                    instance: instance.key,
                    dir: instance.dir,
                    artifact,
                },
            ));
        }

        let output_existed = path_exists(&instance.dir).await?;
        let baseline = strategy.mark_start(&instance, session.as_ref()).await?;
        let mut ctx = TaskContext {
            run_id,
            store: Arc::clone(&session),
            input,
            invoker: Arc::clone(&self.invoker),
            tools: self.settings.tools.clone(),
            malformed_lines: self.settings.malformed_lines,
            events: self.events.clone(),
        };

        let finished = match task.run(&mut ctx).await {
            Ok(()) => {
                strategy
                    .mark_complete(&instance, baseline, session.as_ref())
                    .await
            }
            Err(e) => Err(e),
        };
        let artifact = match finished {
            Ok(artifact) => artifact,
            Err(e) => {
                // A failed instance leaves no output behind.
                if !output_existed {
                    discard_output(&instance.dir).await;
                }
                return Err(e);
            }
        };
        Ok((
            InstanceStatus::Completed,
            InstanceOutput {
                instance: instance.key,
                dir: instance.dir,
                artifact,
            },
        ))
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.events {
            bus.emit(event).await;
        }
    }
}

async fn path_exists(path: &Path) -> Result<bool, TaskError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(TaskError::io(path, e)),
    }
}

/// Remove an output directory created by a failed run.
async fn discard_output(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!(dir = %dir.display(), "removed output of failed instance"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(dir = %dir.display(), error = %e, "could not remove output of failed instance"),
    }
}
