//! Wire protocol across the process isolation boundary.
//!
//! The engine writes one [`WorkerRequest`] as JSON to the child's stdin and
//! closes it. The child answers on stdout with newline-delimited
//! [`WorkerMessage`]s: any number of `log` / `set_global` messages followed
//! by exactly one `result` or `error`.

use crate::{ExecutionEnvironment, LogLevel, NodeError, NodeId, PortValues, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRequest {
    /// Registry key of the component to run
    pub component: String,
    pub node_id: NodeId,
    pub params: PortValues,
    pub inputs: PortValues,
    /// Read-only view of custom global variables at dispatch time
    #[serde(default)]
    pub globals: HashMap<String, Value>,
    #[serde(default)]
    pub environment: ExecutionEnvironment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// Dependency or component lookup failure inside the boundary
    Import,
    /// The unit's own logic raised an error
    Execution,
    /// The result could not be encoded
    Serialization,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    Log {
        level: LogLevel,
        message: String,
    },
    SetGlobal {
        key: String,
        value: Value,
    },
    Result {
        outputs: PortValues,
    },
    Error {
        kind: FailureKind,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
}

impl WorkerMessage {
    pub fn from_node_error(error: &NodeError) -> Self {
        let kind = match error {
            NodeError::Import(_) => FailureKind::Import,
            NodeError::Serialization(_) => FailureKind::Serialization,
            _ => FailureKind::Execution,
        };
        WorkerMessage::Error {
            kind,
            message: error.to_string(),
            trace: None,
        }
    }

    /// Map a child-reported failure back into the engine's taxonomy.
    pub fn into_node_error(kind: FailureKind, message: String, trace: Option<String>) -> NodeError {
        let detail = match trace {
            Some(trace) if !trace.trim().is_empty() => format!("{}\n{}", message, trace),
            _ => message,
        };
        match kind {
            FailureKind::Import => NodeError::Import(detail),
            FailureKind::Execution => NodeError::ExecutionFailed(detail),
            FailureKind::Serialization => NodeError::Serialization(detail),
        }
    }

    /// Write this message as a single JSON line and flush.
    pub fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let line = serde_json::to_string(self).map_err(std::io::Error::other)?;
        writeln!(out, "{}", line)?;
        out.flush()
    }
}
