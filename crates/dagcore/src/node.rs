use crate::{NodeError, Params, PortValues, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

pub type NodeId = String;

/// Entry point every pluggable unit implements.
///
/// Returns an output bag whose keys must be a subset of the descriptor's
/// declared output ports.
#[async_trait]
pub trait Component: Send + Sync {
    async fn run(&self, ctx: ComponentContext) -> Result<PortValues, NodeError>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// The only engine services visible to component logic.
pub trait NodeServices: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    fn get_global(&self, key: &str) -> Option<Value>;

    fn set_global(&self, key: &str, value: Value);
}

/// Execution context passed to each component run
#[derive(Clone)]
pub struct ComponentContext {
    pub node_id: NodeId,

    /// Effective (merged) input bag
    pub inputs: PortValues,

    /// Parameters validated against the property schema
    pub params: Params,

    pub services: Arc<dyn NodeServices>,

    pub cancellation: CancellationToken,
}

impl ComponentContext {
    pub fn new(node_id: impl Into<NodeId>, services: Arc<dyn NodeServices>) -> Self {
        Self {
            node_id: node_id.into(),
            inputs: PortValues::new(),
            params: Params::default(),
            services,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: PortValues) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Get required input or return error
    pub fn require_input(&self, name: &str) -> Result<&Value, NodeError> {
        self.inputs
            .get(name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.services.log(LogLevel::Info, message.as_ref());
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.services.log(LogLevel::Warn, message.as_ref());
    }
}

/// In-memory [`NodeServices`]: reads from a globals snapshot, records writes
/// and log lines so the caller can apply or forward them after the run.
#[derive(Default)]
pub struct LocalServices {
    node_id: NodeId,
    globals: Mutex<HashMap<String, Value>>,
    writes: Mutex<Vec<(String, Value)>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
}

impl LocalServices {
    pub fn new(node_id: impl Into<NodeId>, globals: HashMap<String, Value>) -> Self {
        Self {
            node_id: node_id.into(),
            globals: Mutex::new(globals),
            ..Self::default()
        }
    }

    pub fn take_writes(&self) -> Vec<(String, Value)> {
        self.writes
            .lock()
            .map(|mut w| std::mem::take(&mut *w))
            .unwrap_or_default()
    }

    pub fn take_logs(&self) -> Vec<(LogLevel, String)> {
        self.logs
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}

impl NodeServices for LocalServices {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(node_id = %self.node_id, "{}", message),
            LogLevel::Debug => tracing::debug!(node_id = %self.node_id, "{}", message),
            LogLevel::Info => tracing::info!(node_id = %self.node_id, "{}", message),
            LogLevel::Warn => tracing::warn!(node_id = %self.node_id, "{}", message),
            LogLevel::Error => tracing::error!(node_id = %self.node_id, "{}", message),
        }
        if let Ok(mut logs) = self.logs.lock() {
            logs.push((level, message.to_string()));
        }
    }

    fn get_global(&self, key: &str) -> Option<Value> {
        self.globals.lock().ok()?.get(key).cloned()
    }

    fn set_global(&self, key: &str, value: Value) {
        if let Ok(mut globals) = self.globals.lock() {
            globals.insert(key.to_string(), value.clone());
        }
        if let Ok(mut writes) = self.writes.lock() {
            writes.push((key.to_string(), value));
        }
    }
}
