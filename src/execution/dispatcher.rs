//! Bounded-concurrency dispatch of independent tool invocations.
//!
//! [`Dispatcher::run_all`] spawns one tokio task per invocation, gates them
//! on a semaphore sized to the configured concurrency, and awaits every
//! handle before returning. Results come back labelled, in no particular
//! order; callers match them by label, never by position.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

use super::command::{InvocationError, ToolCommand, ToolInvoker, ToolOutput};
use crate::events::{Event, EventBus};

/// Errors that stop a batch before any invocation runs.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A pool of zero workers would never run anything.
    #[error("concurrency must be at least 1, got 0")]
    ZeroConcurrency,

    /// The shared output directory could not be created.
    #[error("failed to create output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One command in a batch, labelled for result matching.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Identifier carried through to the result, e.g. `10.10.10.5-tcp`.
    pub label: String,
    pub command: ToolCommand,
}

impl Invocation {
    pub fn new(label: impl Into<String>, command: ToolCommand) -> Self {
        Self {
            label: label.into(),
            command,
        }
    }
}

/// Outcome of one invocation.
#[derive(Debug)]
pub struct InvocationResult {
    pub label: String,
    pub outcome: Result<ToolOutput, InvocationError>,
}

impl InvocationResult {
    /// Whether the process started and exited with code 0.
    pub fn succeeded(&self) -> bool {
        matches!(&self.outcome, Ok(output) if output.success())
    }

    /// Exit code, when the process ran to an exit.
    pub fn exit_code(&self) -> Option<i32> {
        self.outcome.as_ref().ok().and_then(|o| o.exit_code)
    }
}

/// Runs batches of invocations with bounded parallelism.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    concurrency: usize,
}

impl Dispatcher {
    /// Create a dispatcher; zero concurrency is rejected up front.
    pub fn new(concurrency: usize) -> Result<Self, DispatchError> {
        if concurrency == 0 {
            return Err(DispatchError::ZeroConcurrency);
        }
        Ok(Self { concurrency })
    }

    /// Maximum number of invocations in flight.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Create the batch's output directory if it is not there yet.
    pub async fn prepare_output_dir(&self, dir: &Path) -> Result<(), DispatchError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| DispatchError::OutputDir {
                path: dir.to_path_buf(),
                source,
            })
    }

    /// Run every invocation and wait for all of them.
    ///
    /// A failing invocation never cancels its siblings.
    pub async fn run_all(
        &self,
        invoker: Arc<dyn ToolInvoker>,
        invocations: Vec<Invocation>,
        events: Option<Arc<EventBus>>,
    ) -> Vec<InvocationResult> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(invocations.len());

        debug!(
            count = invocations.len(),
            concurrency = self.concurrency,
            "dispatching invocations"
        );

        for invocation in invocations {
            let label = invocation.label.clone();
            let semaphore = Arc::clone(&semaphore);
            let invoker = Arc::clone(&invoker);
            let events = events.clone();
            let span = info_span!("tool_invocation", label = %invocation.label);

            let handle = tokio::spawn(
                async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return InvocationResult {
                            label: invocation.label,
                            outcome: Err(InvocationError::Aborted(
                                "dispatcher shut down".to_string(),
                            )),
                        };
                    };

                    let start = Instant::now();
                    debug!(command = %invocation.command, "invoking");
                    let outcome = invoker.invoke(&invocation.command).await;

                    let result = InvocationResult {
                        label: invocation.label,
                        outcome,
                    };
                    match &result.outcome {
                        Ok(output) if output.success() => {
                            debug!(elapsed = ?start.elapsed(), "invocation finished")
                        }
                        Ok(output) => warn!(
                            exit_code = ?output.exit_code,
                            stderr = %output.stderr_lossy().trim(),
                            "invocation exited unsuccessfully"
                        ),
                        Err(e) => warn!(error = %e, "invocation failed"),
                    }

                    if let Some(bus) = &events {
                        bus.emit(Event::invocation_finished(
                            result.label.clone(),
                            result.exit_code(),
                            result.succeeded(),
                        ))
                        .await;
                    }
                    result
                }
                .instrument(span),
            );
            handles.push((label, handle));
        }

        // Barrier: nothing is returned until every invocation is done.
        let mut results = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(label = %label, error = %e, "invocation task aborted");
                    results.push(InvocationResult {
                        label,
                        outcome: Err(InvocationError::Aborted(e.to_string())),
                    });
                }
            }
        }
        results
    }
}
