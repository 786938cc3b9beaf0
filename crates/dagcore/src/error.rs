use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Component load error: {0}")]
    ComponentLoad(#[from] ComponentLoadError),

    #[error("External input error: {0}")]
    ExternalInput(#[from] ExternalInputError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single node. Contained by the engine: the node's output is
/// recorded as empty and the run continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Component contract violated: undeclared output port(s) {0:?}")]
    UndeclaredOutputs(Vec<String>),

    #[error("Timeout after {limit:?}")]
    Timeout { limit: Duration },

    #[error("Cancelled")]
    Cancelled,
}

impl NodeError {
    /// Short machine-readable tag, used in reports and the wire protocol.
    pub fn kind(&self) -> &'static str {
        match self {
            NodeError::MissingInput(_) | NodeError::InvalidInputType { .. } => "input",
            NodeError::Configuration(_) => "configuration",
            NodeError::Import(_) => "import",
            NodeError::ExecutionFailed(_) => "execution",
            NodeError::Serialization(_) => "serialization",
            NodeError::UndeclaredOutputs(_) => "contract",
            NodeError::Timeout { .. } => "timeout",
            NodeError::Cancelled => "cancelled",
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("Cyclic dependency detected among nodes: {}", nodes.join(", "))]
    CycleDetected { nodes: Vec<String> },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Unknown component: {0}")]
    UnknownComponent(String),

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}

/// Per-file failure while scanning a component tree. Never aborts a scan.
#[derive(Error, Debug, Clone)]
pub enum ComponentLoadError {
    #[error("Failed to read {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Malformed component definition {path}: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("Duplicate component key '{key}' in {path}")]
    Duplicate { key: String, path: PathBuf },
}

impl ComponentLoadError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ComponentLoadError::Read { path, .. }
            | ComponentLoadError::Malformed { path, .. }
            | ComponentLoadError::Duplicate { path, .. } => path,
        }
    }
}

/// Malformed caller-supplied overrides at the serving boundary.
#[derive(Error, Debug, Clone)]
pub enum ExternalInputError {
    #[error("Unknown input '{0}'")]
    UnknownInput(String),

    #[error("Input '{key}' expects {expected}, got {actual}")]
    TypeMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid upload for '{key}': {message}")]
    InvalidUpload { key: String, message: String },

    #[error("Malformed request: {0}")]
    Malformed(String),
}
