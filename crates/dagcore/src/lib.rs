//! Core abstractions for the workflow engine
//!
//! Data model, error taxonomy, the component contract, the run-scoped global
//! variable store and the wire protocol spoken across the process isolation
//! boundary. Everything else in the workspace builds on these types.

mod component;
mod context;
mod error;
pub mod events;
mod node;
pub mod protocol;
mod value;
mod workflow;

pub use component::{ComponentDescriptor, Params, PortSpec, PropertySpec, PropertyType};
pub use context::{ExecutionEnvironment, GlobalVariable, GlobalVariableContext, VariableScope};
pub use error::{ComponentLoadError, ExternalInputError, FlowError, NodeError, WorkflowError};
pub use events::*;
pub use node::{Component, ComponentContext, LocalServices, LogLevel, NodeId, NodeServices};
pub use value::{PortValues, Value, ValueExt};
pub use workflow::{
    component_key, Connection, ConnectionEntry, GraphSection, NodeEntry, NodeSpec,
    RuntimeSection, WorkflowDocument, WorkflowGraph,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
