use crate::executor::{ExecutionResult, FailurePolicy, RunOptions, WorkflowExecutor};
use crate::isolation::{InProcessExecutor, NodeExecutor, ProcessExecutor};
use crate::registry::{ComponentRegistry, ConflictPolicy};
use dagcore::{EventBus, ExecutionEvent, FlowError, WorkflowDocument, WorkflowGraph};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Main runtime for executing workflows
pub struct FlowRuntime {
    registry: Arc<ComponentRegistry>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    config: RuntimeConfig,
}

impl FlowRuntime {
    /// Create a runtime whose node executor follows `config.isolation`.
    pub fn new(registry: Arc<ComponentRegistry>, config: RuntimeConfig) -> Result<Self, FlowError> {
        let process = match &config.worker_program {
            Some(program) => ProcessExecutor::new(program),
            None => ProcessExecutor::current_exe()?,
        }
        .with_worker_args(config.worker_args.iter().cloned())
        .with_timeout(config.node_timeout);

        let node_executor: Arc<dyn NodeExecutor> = match config.isolation {
            IsolationMode::Process => Arc::new(process),
            IsolationMode::InProcess => Arc::new(InProcessExecutor::new(process)),
        };
        Ok(Self::with_executor(registry, node_executor, config))
    }

    /// Create a runtime around a caller-provided node executor
    pub fn with_executor(
        registry: Arc<ComponentRegistry>,
        node_executor: Arc<dyn NodeExecutor>,
        config: RuntimeConfig,
    ) -> Self {
        let executor = WorkflowExecutor::new(registry.clone(), node_executor)
            .with_max_parallel(config.max_parallel_nodes)
            .with_failure_policy(config.failure_policy);

        Self {
            registry,
            executor: Arc::new(executor),
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Load a workflow document, skipping nodes whose component is unknown.
    pub fn load_workflow(&self, path: impl AsRef<Path>) -> Result<WorkflowGraph, FlowError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading workflow");
        let document = WorkflowDocument::from_path(path)?;
        let workflow = document.into_graph(|key| self.registry.contains(key))?;
        Ok(match path.file_stem() {
            Some(stem) if workflow.name.is_none() => workflow.with_name(stem.to_string_lossy()),
            _ => workflow,
        })
    }

    /// Execute a workflow directly
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        options: RunOptions,
    ) -> Result<ExecutionResult, FlowError> {
        self.executor
            .execute(workflow, options, &self.event_bus)
            .await
    }

    pub async fn execute_file(
        &self,
        path: impl AsRef<Path>,
        options: RunOptions,
    ) -> Result<ExecutionResult, FlowError> {
        let workflow = self.load_workflow(path)?;
        self.execute(&workflow, options).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

/// Where built-in components execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationMode {
    /// One child process per node
    #[default]
    Process,
    /// Built-ins on tokio tasks in the engine process
    InProcess,
}

pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_parallel_nodes: usize,
    pub event_buffer_size: usize,
    pub node_timeout: Option<Duration>,
    pub failure_policy: FailurePolicy,
    pub isolation: IsolationMode,
    /// Worker program for built-ins; defaults to the current executable
    pub worker_program: Option<PathBuf>,
    pub worker_args: Vec<String>,
    pub conflict_policy: ConflictPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_nodes: 1,
            event_buffer_size: 1000,
            node_timeout: Some(DEFAULT_NODE_TIMEOUT),
            failure_policy: FailurePolicy::default(),
            isolation: IsolationMode::default(),
            worker_program: None,
            worker_args: vec!["worker".to_string()],
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `DAGRUN_*` environment variables.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(n) = parse_var::<usize>(&var, "DAGRUN_MAX_PARALLEL") {
            config.max_parallel_nodes = n.max(1);
        }
        // Seconds; 0 disables the limit
        if let Some(secs) = parse_var::<u64>(&var, "DAGRUN_NODE_TIMEOUT") {
            config.node_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(policy) = parse_var::<FailurePolicy>(&var, "DAGRUN_FAILURE_POLICY") {
            config.failure_policy = policy;
        }
        if let Some(policy) = parse_var::<ConflictPolicy>(&var, "DAGRUN_CONFLICT_POLICY") {
            config.conflict_policy = policy;
        }
        if let Some(program) = var("DAGRUN_WORKER").filter(|p| !p.trim().is_empty()) {
            config.worker_program = Some(PathBuf::from(program));
        }
        if let Some(args) = var("DAGRUN_WORKER_ARGS") {
            config.worker_args = args.split_whitespace().map(str::to_string).collect();
        }
        config
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var(name)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {}={:?}: {}", name, raw, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> RuntimeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RuntimeConfig::from_vars(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_bound_every_node() {
        let config = config_from(&[]);
        assert_eq!(config.node_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.worker_args, vec!["worker"]);
        assert_eq!(config.max_parallel_nodes, 1);
    }

    #[test]
    fn environment_overrides() {
        let config = config_from(&[
            ("DAGRUN_NODE_TIMEOUT", "12"),
            ("DAGRUN_MAX_PARALLEL", "0"),
            ("DAGRUN_FAILURE_POLICY", "skip-dependents"),
            ("DAGRUN_CONFLICT_POLICY", "reject"),
            ("DAGRUN_WORKER", "/opt/dagrun"),
            ("DAGRUN_WORKER_ARGS", "--quiet worker"),
        ]);
        assert_eq!(config.node_timeout, Some(Duration::from_secs(12)));
        assert_eq!(config.max_parallel_nodes, 1);
        assert_eq!(config.failure_policy, FailurePolicy::SkipDependents);
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
        assert_eq!(config.worker_program, Some(PathBuf::from("/opt/dagrun")));
        assert_eq!(config.worker_args, vec!["--quiet", "worker"]);
    }

    #[test]
    fn zero_timeout_disables_the_limit() {
        assert_eq!(config_from(&[("DAGRUN_NODE_TIMEOUT", "0")]).node_timeout, None);
    }

    #[test]
    fn unparseable_values_keep_defaults() {
        let config = config_from(&[
            ("DAGRUN_NODE_TIMEOUT", "soon"),
            ("DAGRUN_CONFLICT_POLICY", "whatever"),
        ]);
        assert_eq!(config.node_timeout, Some(DEFAULT_NODE_TIMEOUT));
        assert_eq!(config.conflict_policy, ConflictPolicy::default());
    }
}
