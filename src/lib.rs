//! recon - a reconnaissance pipeline over external scanning tools.
//!
//! A requested task is resolved into a chain back to its root (target list,
//! service scan, exploit lookup), and each link runs only if its completion
//! strategy says its output is missing. Tool invocations fan out over a
//! bounded worker pool; their output is parsed, matched to targets, and
//! committed to the target store.

pub mod completion;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod parse;
pub mod recon;
pub mod storage;
pub mod testing;

pub use completion::{
    ArtifactExists, Baseline, CompletionKind, CompletionStrategy, ContentHash, HighWaterMark,
};
pub use config::{ConfigError, EngineBuilder, ReconConfig, StorageConfig, ToolPaths, YamlLoader};
pub use crate::core::chain::{ChainError, TaskChain};
pub use crate::core::params::{
    ExploitLookupParams, PipelineParams, ServiceScanParams, TargetListParams, coerce_threads,
};
pub use crate::core::task::{ArtifactRef, InstanceOutput, InstanceRef, ReconTask, TaskContext, TaskError};
pub use crate::core::types::{InstanceKey, ResultTable, RunId, TaskKind, UnknownTaskKind};
pub use events::{Event, EventBus, EventHandler};
pub use execution::{
    DispatchError, Dispatcher, EngineSettings, InstanceReport, InstanceStatus, Invocation,
    InvocationError, InvocationResult, PipelineEngine, PipelineError, PipelineReport, PlanEntry,
    ProcessInvoker, ToolCommand, ToolCommandBuilder, ToolInvoker, ToolOutput,
};
pub use parse::{
    CorrelationError, CorrelationReport, Correlator, MalformedLinePolicy, ParseAnomaly, ParseError,
};
pub use recon::{ExploitLookup, PortMap, Protocol, ServiceScan, TargetList};
#[cfg(feature = "sqlite")]
pub use storage::{SqliteConnector, SqliteStore};
pub use storage::{
    CompletionMarker, ExploitMatch, ExploitRecord, InMemoryStore, MemoryConnector, ResultBatch,
    ResultRecord, ScanResult, StoreConnector, StoreError, Target, TargetStore,
};
