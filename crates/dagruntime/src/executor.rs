use crate::graph::DependencyGraph;
use crate::isolation::{Invocation, NodeExecutor, NodeOutcome};
use crate::merge::merge_inputs;
use crate::registry::{ComponentRegistry, RegisteredComponent};
use chrono::Utc;
use dagcore::{
    EventBus, ExecutionEvent, ExecutionId, FlowError, GlobalVariableContext, NodeError, NodeId,
    PortValues, Value, WorkflowError, WorkflowGraph,
};
use futures::stream::{FuturesUnordered, StreamExt};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Caller-supplied overrides, keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct ExternalInputs {
    /// Input port values; these beat every other input layer
    pub inputs: HashMap<NodeId, PortValues>,
    /// Property values merged over the configured params before validation
    pub params: HashMap<NodeId, PortValues>,
}

impl ExternalInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(
        mut self,
        node_id: impl Into<NodeId>,
        port: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.inputs
            .entry(node_id.into())
            .or_default()
            .insert(port.into(), value.into());
        self
    }

    pub fn with_param(
        mut self,
        node_id: impl Into<NodeId>,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.params
            .entry(node_id.into())
            .or_default()
            .insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty() && self.params.is_empty()
    }

    fn node_ids(&self) -> impl Iterator<Item = &NodeId> {
        self.inputs.keys().chain(self.params.keys())
    }
}

/// Per-run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub external: ExternalInputs,
    /// Initial global variables; `run_id` is filled in if absent
    pub globals: GlobalVariableContext,
    pub cancellation: CancellationToken,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_external(mut self, external: ExternalInputs) -> Self {
        self.external = external;
        self
    }

    pub fn with_globals(mut self, globals: GlobalVariableContext) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }
}

/// What happens downstream of a failed node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failed nodes yield an empty output bag and the run goes on
    #[default]
    Continue,
    /// Nodes downstream of a failure are not executed
    SkipDependents,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continue" | "fail-open" => Ok(FailurePolicy::Continue),
            "skip-dependents" | "skip_dependents" | "fail-closed" => Ok(FailurePolicy::SkipDependents),
            other => Err(format!("unknown failure policy '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    pub status: NodeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

impl NodeReport {
    fn succeeded(duration_ms: u64) -> Self {
        Self {
            status: NodeStatus::Succeeded,
            error: None,
            error_kind: None,
            duration_ms,
        }
    }

    fn failed(error: &NodeError, duration_ms: u64) -> Self {
        Self {
            status: NodeStatus::Failed,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            duration_ms,
        }
    }

    fn skipped(reason: String) -> Self {
        Self {
            status: NodeStatus::Skipped,
            error: Some(reason),
            error_kind: None,
            duration_ms: 0,
        }
    }
}

/// Result of workflow execution
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    /// Topological order the run followed
    pub order: Vec<NodeId>,
    /// Output bag per node, in `order`; empty for failed or skipped nodes
    pub outputs: IndexMap<NodeId, PortValues>,
    pub reports: IndexMap<NodeId, NodeReport>,
    /// Global variables as they stood when the run finished
    pub globals: GlobalVariableContext,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn output(&self, node_id: &str, port: &str) -> Option<&Value> {
        self.outputs.get(node_id)?.get(port)
    }

    pub fn count(&self, status: NodeStatus) -> usize {
        self.reports.values().filter(|r| r.status == status).count()
    }

    pub fn succeeded(&self) -> usize {
        self.count(NodeStatus::Succeeded)
    }

    pub fn failed(&self) -> usize {
        self.count(NodeStatus::Failed)
    }

    pub fn is_success(&self) -> bool {
        self.reports.values().all(|r| r.status == NodeStatus::Succeeded)
    }
}

/// Executes workflows in dependency order.
pub struct WorkflowExecutor {
    registry: Arc<ComponentRegistry>,
    node_executor: Arc<dyn NodeExecutor>,
    max_parallel: usize,
    failure_policy: FailurePolicy,
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<ComponentRegistry>, node_executor: Arc<dyn NodeExecutor>) -> Self {
        Self {
            registry,
            node_executor,
            max_parallel: 1,
            failure_policy: FailurePolicy::default(),
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Execute a workflow and return the per-node output table.
    ///
    /// Only document-level problems (dangling connections, unknown
    /// components, cycles) fail the call; in that case nothing runs.
    pub async fn execute(
        &self,
        workflow: &WorkflowGraph,
        options: RunOptions,
        event_bus: &EventBus,
    ) -> Result<ExecutionResult, FlowError> {
        workflow.validate()?;

        let mut components = HashMap::new();
        for node in workflow.nodes.values() {
            let registered = self.registry.get(&node.component).ok_or_else(|| {
                WorkflowError::UnknownComponent(format!("{} (node {})", node.component, node.id))
            })?;
            components.insert(node.id.clone(), registered.clone());
        }

        let graph = DependencyGraph::build(&workflow.node_ids(), &workflow.connections)?;

        for node_id in options.external.node_ids() {
            if !workflow.nodes.contains_key(node_id) {
                tracing::warn!(node_id = %node_id, "Override targets a node that is not in the workflow");
            }
        }

        let execution_id = ExecutionId::new_v4();
        let start_time = Instant::now();
        let RunOptions {
            external,
            mut globals,
            cancellation,
        } = options;
        if globals.env.run_id.is_none() {
            globals.env.run_id = Some(execution_id.to_string());
        }

        let mut run = RunState {
            execution_id,
            event_bus,
            globals: RwLock::new(globals),
            outputs: HashMap::new(),
            reports: HashMap::new(),
            finished: HashSet::new(),
            failed: Vec::new(),
        };

        event_bus.emit(ExecutionEvent::WorkflowStarted {
            execution_id,
            total_nodes: graph.order().len(),
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution_id,
            workflow = workflow.name.as_deref().unwrap_or("<unnamed>"),
            nodes = graph.order().len(),
            "Starting workflow execution"
        );

        let mut pending: VecDeque<NodeId> = graph.order().iter().cloned().collect();
        let mut running = FuturesUnordered::new();

        loop {
            while running.len() < self.max_parallel {
                let Some(pos) = pending.iter().position(|id| {
                    graph
                        .predecessors(id)
                        .iter()
                        .all(|p| run.finished.contains(p))
                }) else {
                    break;
                };
                let Some(node_id) = pending.remove(pos) else {
                    break;
                };

                if cancellation.is_cancelled() {
                    run.fail(&node_id, NodeError::Cancelled, 0);
                    continue;
                }
                if self.failure_policy == FailurePolicy::SkipDependents {
                    if let Some(cause) = run.failed.iter().find(|f| graph.has_path(f, &node_id)) {
                        let reason = format!("upstream node '{}' failed", cause);
                        run.skip(&node_id, reason);
                        continue;
                    }
                }

                let (Some(node), Some(registered)) =
                    (workflow.find_node(&node_id), components.get(&node_id))
                else {
                    continue;
                };

                let inputs = merge_inputs(
                    node,
                    &registered.descriptor,
                    workflow.incoming(&node_id),
                    &run.outputs,
                    external.inputs.get(&node_id),
                );
                let mut raw_params = node.params.clone();
                if let Some(overrides) = external.params.get(&node_id) {
                    raw_params.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                let params = match registered.descriptor.validate_params(&raw_params) {
                    Ok(params) => params,
                    Err(e) => {
                        run.fail(&node_id, e, 0);
                        continue;
                    }
                };

                let (globals, environment) = {
                    let globals = run.globals.read().await;
                    (globals.values(), globals.env.clone())
                };
                let invocation = Invocation {
                    node_id: node_id.clone(),
                    descriptor: registered.descriptor.clone(),
                    source: registered.source.clone(),
                    params,
                    inputs,
                    globals,
                    environment,
                    program: node
                        .environment
                        .clone()
                        .or_else(|| workflow.environment.clone()),
                    events: event_bus.create_emitter(execution_id, node_id.clone()),
                    cancellation: cancellation.clone(),
                };

                event_bus.emit(ExecutionEvent::NodeStarted {
                    execution_id,
                    node_id: node_id.clone(),
                    component: node.component.clone(),
                    timestamp: Utc::now(),
                });
                tracing::debug!(node_id = %node_id, component = %node.component, "Dispatching node");

                let span = tracing::info_span!("node", node_id = %node_id, component = %node.component);
                let executor = self.node_executor.clone();
                let handle = tokio::spawn(
                    async move {
                        let start = Instant::now();
                        let outcome = executor.invoke(invocation).await;
                        (outcome, start.elapsed().as_millis() as u64)
                    }
                    .instrument(span),
                );
                running.push(async move { (node_id, handle.await) });
            }

            // Nothing in flight means nothing left that can become ready
            if running.is_empty() {
                break;
            }

            let Some((node_id, joined)) = running.next().await else {
                break;
            };
            let (outcome, duration_ms) = joined.unwrap_or_else(|e| {
                (
                    NodeOutcome::failed(NodeError::ExecutionFailed(format!("node task failed: {}", e))),
                    0,
                )
            });
            let Some(registered) = components.get(&node_id) else {
                continue;
            };
            run.complete(&node_id, registered, outcome, duration_ms).await;
        }

        let duration_ms = start_time.elapsed().as_millis() as u64;
        let order = graph.order().to_vec();
        let mut outputs = IndexMap::new();
        let mut reports = IndexMap::new();
        for node_id in &order {
            outputs.insert(node_id.clone(), run.outputs.remove(node_id).unwrap_or_default());
            if let Some(report) = run.reports.remove(node_id) {
                reports.insert(node_id.clone(), report);
            }
        }

        let result = ExecutionResult {
            execution_id,
            order,
            outputs,
            reports,
            globals: run.globals.into_inner(),
            duration_ms,
        };

        event_bus.emit(ExecutionEvent::WorkflowCompleted {
            execution_id,
            succeeded: result.succeeded(),
            failed: result.failed(),
            duration_ms,
            timestamp: Utc::now(),
        });
        tracing::info!(
            execution_id = %execution_id,
            succeeded = result.succeeded(),
            failed = result.failed(),
            skipped = result.count(NodeStatus::Skipped),
            duration_ms,
            "Workflow execution finished"
        );

        Ok(result)
    }
}

/// Mutable bookkeeping for one run.
struct RunState<'a> {
    execution_id: ExecutionId,
    event_bus: &'a EventBus,
    globals: RwLock<GlobalVariableContext>,
    outputs: HashMap<NodeId, PortValues>,
    reports: HashMap<NodeId, NodeReport>,
    finished: HashSet<NodeId>,
    failed: Vec<NodeId>,
}

impl RunState<'_> {
    async fn complete(
        &mut self,
        node_id: &NodeId,
        registered: &RegisteredComponent,
        outcome: NodeOutcome,
        duration_ms: u64,
    ) {
        if !outcome.global_writes.is_empty() {
            let mut globals = self.globals.write().await;
            for (key, value) in outcome.global_writes {
                tracing::debug!(node_id = %node_id, key = %key, "Global variable set");
                globals.set(key, value);
            }
        }

        let result = outcome
            .result
            .and_then(|out| registered.descriptor.check_outputs(&out).map(|_| out));

        match result {
            Ok(outputs) => {
                tracing::info!(node_id = %node_id, duration_ms, "Node completed");
                self.event_bus.emit(ExecutionEvent::NodeCompleted {
                    execution_id: self.execution_id,
                    node_id: node_id.clone(),
                    outputs: outputs.clone(),
                    duration_ms,
                    timestamp: Utc::now(),
                });
                self.outputs.insert(node_id.clone(), outputs);
                self.reports
                    .insert(node_id.clone(), NodeReport::succeeded(duration_ms));
                self.finished.insert(node_id.clone());
            }
            Err(e) => self.fail(node_id, e, duration_ms),
        }
    }

    fn fail(&mut self, node_id: &NodeId, error: NodeError, duration_ms: u64) {
        tracing::error!(node_id = %node_id, kind = error.kind(), "Node failed: {}", error);
        self.event_bus.emit(ExecutionEvent::NodeFailed {
            execution_id: self.execution_id,
            node_id: node_id.clone(),
            error: error.to_string(),
            timestamp: Utc::now(),
        });
        self.outputs.insert(node_id.clone(), PortValues::new());
        self.reports
            .insert(node_id.clone(), NodeReport::failed(&error, duration_ms));
        self.finished.insert(node_id.clone());
        self.failed.push(node_id.clone());
    }

    fn skip(&mut self, node_id: &NodeId, reason: String) {
        tracing::warn!(node_id = %node_id, "Node skipped: {}", reason);
        self.event_bus.emit(ExecutionEvent::NodeSkipped {
            execution_id: self.execution_id,
            node_id: node_id.clone(),
            reason: reason.clone(),
            timestamp: Utc::now(),
        });
        self.outputs.insert(node_id.clone(), PortValues::new());
        self.reports.insert(node_id.clone(), NodeReport::skipped(reason));
        self.finished.insert(node_id.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_policy_parses_aliases() {
        assert_eq!("fail-closed".parse::<FailurePolicy>(), Ok(FailurePolicy::SkipDependents));
        assert_eq!("Continue".parse::<FailurePolicy>(), Ok(FailurePolicy::Continue));
        assert!("sometimes".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn external_inputs_accumulate_per_node() {
        let ext = ExternalInputs::new()
            .with_input("a", "x", 1)
            .with_input("a", "y", 2)
            .with_param("b", "factor", 3.0);
        assert_eq!(ext.inputs["a"].len(), 2);
        assert_eq!(ext.params["b"]["factor"], serde_json::json!(3.0));
        assert!(!ext.is_empty());
    }
}
