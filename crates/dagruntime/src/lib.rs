//! Workflow execution runtime
//!
//! Component registry and script discovery, dependency ordering, input
//! merging, the node executors behind the process isolation boundary and
//! the engine that drives a workflow run.

mod executor;
mod graph;
mod isolation;
pub mod loader;
mod merge;
mod registry;
mod runtime;
pub mod worker;

pub use executor::{
    ExecutionResult, ExternalInputs, FailurePolicy, NodeReport, NodeStatus, RunOptions,
    WorkflowExecutor,
};
pub use graph::{build_order, DependencyGraph};
pub use isolation::{InProcessExecutor, Invocation, NodeExecutor, NodeOutcome, ProcessExecutor};
pub use merge::{merge_inputs, COLUMN_SELECT_SUFFIX};
pub use registry::{
    ComponentFactory, ComponentRegistry, ComponentSource, ConflictPolicy, RegisteredComponent,
    ScanReport,
};
pub use runtime::{FlowRuntime, IsolationMode, RuntimeConfig};
