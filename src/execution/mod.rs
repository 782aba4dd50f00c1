//! Execution layer.
//!
//! Running external tools ([`ToolInvoker`]), fanning a batch of them out
//! over a bounded pool ([`Dispatcher`]), and driving a task chain from root
//! to leaf ([`PipelineEngine`]).

mod command;
mod dispatcher;
mod engine;

pub use command::{
    InvocationError, ProcessInvoker, ToolCommand, ToolCommandBuilder, ToolInvoker, ToolOutput,
};
pub use dispatcher::{DispatchError, Dispatcher, Invocation, InvocationResult};
pub use engine::{
    EngineSettings, InstanceReport, InstanceStatus, PipelineEngine, PipelineError, PipelineReport,
    PlanEntry,
};
