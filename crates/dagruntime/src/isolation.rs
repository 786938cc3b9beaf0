//! Node executors: the boundary a node's logic runs behind.

use crate::registry::ComponentSource;
use async_trait::async_trait;
use dagcore::protocol::{WorkerMessage, WorkerRequest};
use dagcore::{
    ComponentContext, ComponentDescriptor, EventEmitter, ExecutionEnvironment, LocalServices,
    LogLevel, NodeError, NodeId, Params, PortValues, Value,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio_util::sync::CancellationToken;

/// Everything needed to run one node once.
pub struct Invocation {
    pub node_id: NodeId,
    pub descriptor: Arc<ComponentDescriptor>,
    pub source: ComponentSource,
    pub params: Params,
    pub inputs: PortValues,
    /// Custom global values at dispatch time
    pub globals: HashMap<String, Value>,
    pub environment: ExecutionEnvironment,
    /// Interpreter replacing a script's first command word. Built-ins
    /// always run in the configured worker program.
    pub program: Option<PathBuf>,
    pub events: EventEmitter,
    pub cancellation: CancellationToken,
}

impl Invocation {
    pub fn component(&self) -> String {
        self.descriptor.key()
    }

    fn request(&self) -> WorkerRequest {
        WorkerRequest {
            component: self.component(),
            node_id: self.node_id.clone(),
            params: self.params.as_map().clone(),
            inputs: self.inputs.clone(),
            globals: self.globals.clone(),
            environment: self.environment.clone(),
        }
    }
}

/// Result of one executor call.
///
/// Global writes are reported even when the call failed.
#[derive(Debug)]
pub struct NodeOutcome {
    pub result: Result<PortValues, NodeError>,
    pub global_writes: Vec<(String, Value)>,
}

impl NodeOutcome {
    pub fn failed(error: NodeError) -> Self {
        Self {
            result: Err(error),
            global_writes: Vec::new(),
        }
    }
}

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn invoke(&self, invocation: Invocation) -> NodeOutcome;
}

fn replay_log(node_id: &str, level: LogLevel, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(node_id = %node_id, "{}", message),
        LogLevel::Debug => tracing::debug!(node_id = %node_id, "{}", message),
        LogLevel::Info => tracing::info!(node_id = %node_id, "{}", message),
        LogLevel::Warn => tracing::warn!(node_id = %node_id, "{}", message),
        LogLevel::Error => tracing::error!(node_id = %node_id, "{}", message),
    }
}

fn looks_like_import_failure(stderr: &str) -> bool {
    stderr.contains("ImportError") || stderr.contains("ModuleNotFoundError")
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

/// Runs every node in its own child process.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    worker_program: PathBuf,
    worker_args: Vec<String>,
    timeout: Option<Duration>,
}

impl ProcessExecutor {
    pub fn new(worker_program: impl Into<PathBuf>) -> Self {
        Self {
            worker_program: worker_program.into(),
            worker_args: vec!["worker".to_string()],
            timeout: None,
        }
    }

    /// Use the running executable's `worker` subcommand for built-ins.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_worker_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.worker_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, invocation: &Invocation) -> Result<Command, NodeError> {
        match &invocation.source {
            ComponentSource::Builtin(_) => {
                let mut cmd = Command::new(&self.worker_program);
                cmd.args(&self.worker_args);
                Ok(cmd)
            }
            ComponentSource::Script(entry) => {
                let (first, rest) = entry.command.split_first().ok_or_else(|| {
                    NodeError::Import(format!("{} has no command", entry.path.display()))
                })?;
                let program = invocation
                    .program
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(first));
                let mut cmd = Command::new(program);
                cmd.args(rest).current_dir(entry.working_dir());
                Ok(cmd)
            }
        }
    }

    async fn run_child(
        &self,
        invocation: &Invocation,
        writes: &mut Vec<(String, Value)>,
    ) -> Result<PortValues, NodeError> {
        let payload = serde_json::to_vec(&invocation.request())
            .map_err(|e| NodeError::Serialization(e.to_string()))?;

        let mut cmd = self.command(invocation)?;
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(|e| {
            NodeError::Import(format!(
                "could not start {:?}: {}",
                cmd.as_std().get_program(),
                e
            ))
        })?;

        // Dropping the exchange drops the child, which kills it.
        let exchange = exchange(child, payload, invocation, writes);
        tokio::select! {
            biased;
            _ = invocation.cancellation.cancelled() => Err(NodeError::Cancelled),
            result = with_timeout(self.timeout, exchange) => result,
        }
    }
}

async fn with_timeout<F>(limit: Option<Duration>, fut: F) -> Result<PortValues, NodeError>
where
    F: std::future::Future<Output = Result<PortValues, NodeError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(NodeError::Timeout { limit })),
        None => fut.await,
    }
}

async fn exchange(
    mut child: Child,
    payload: Vec<u8>,
    invocation: &Invocation,
    writes: &mut Vec<(String, Value)>,
) -> Result<PortValues, NodeError> {
    let pipe_error = || NodeError::ExecutionFailed("child stdio unavailable".to_string());
    let mut stdin = child.stdin.take().ok_or_else(pipe_error)?;
    let stdout = child.stdout.take().ok_or_else(pipe_error)?;
    let mut stderr = child.stderr.take().ok_or_else(pipe_error)?;

    let feed = async move {
        if let Err(e) = stdin.write_all(&payload).await {
            tracing::debug!("Child closed stdin early: {}", e);
        }
        drop(stdin);
    };
    let drain = async move {
        let mut text = String::new();
        if let Err(e) = stderr.read_to_string(&mut text).await {
            tracing::debug!("Failed to read child stderr: {}", e);
        }
        text
    };
    let (_, reply, diagnostics) = tokio::join!(feed, read_reply(stdout, invocation, writes), drain);

    for line in diagnostics.lines().filter(|l| !l.trim().is_empty()) {
        tracing::debug!(node_id = %invocation.node_id, stderr = true, "{}", line);
    }

    let status = child
        .wait()
        .await
        .map_err(|e| NodeError::ExecutionFailed(format!("failed to wait for child: {}", e)))?;

    match reply {
        Some(result) => result,
        None if looks_like_import_failure(&diagnostics) => {
            Err(NodeError::Import(tail(&diagnostics, 20)))
        }
        None => Err(NodeError::ExecutionFailed(format!(
            "{} exited ({}) without a result\n{}",
            invocation.component(),
            status,
            tail(&diagnostics, 20)
        ))),
    }
}

/// Consume protocol lines until a terminal message or EOF.
async fn read_reply(
    stdout: ChildStdout,
    invocation: &Invocation,
    writes: &mut Vec<(String, Value)>,
) -> Option<Result<PortValues, NodeError>> {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return None,
            Err(e) => {
                return Some(Err(NodeError::Serialization(format!(
                    "unreadable child output: {}",
                    e
                ))))
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<WorkerMessage>(line) {
            Ok(WorkerMessage::Log { level, message }) => {
                replay_log(&invocation.node_id, level, &message);
                invocation.events.log(level, message);
            }
            Ok(WorkerMessage::SetGlobal { key, value }) => writes.push((key, value)),
            Ok(WorkerMessage::Result { outputs }) => return Some(Ok(outputs)),
            Ok(WorkerMessage::Error {
                kind,
                message,
                trace,
            }) => return Some(Err(WorkerMessage::into_node_error(kind, message, trace))),
            Err(e) => {
                let is_result = serde_json::from_str::<Value>(line)
                    .ok()
                    .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "result"))
                    .unwrap_or(false);
                if is_result {
                    return Some(Err(NodeError::Serialization(format!(
                        "result could not be decoded: {}",
                        e
                    ))));
                }
                tracing::debug!(node_id = %invocation.node_id, "Non-protocol stdout: {}", line);
            }
        }
    }
}

#[async_trait]
impl NodeExecutor for ProcessExecutor {
    async fn invoke(&self, invocation: Invocation) -> NodeOutcome {
        let mut writes = Vec::new();
        let result = self.run_child(&invocation, &mut writes).await;
        NodeOutcome {
            result,
            global_writes: writes,
        }
    }
}

/// Runs built-ins on a tokio task inside the engine process; scripts still
/// go through `scripts`.
#[derive(Debug, Clone)]
pub struct InProcessExecutor {
    scripts: ProcessExecutor,
    timeout: Option<Duration>,
}

impl InProcessExecutor {
    pub fn new(scripts: ProcessExecutor) -> Self {
        let timeout = scripts.timeout;
        Self { scripts, timeout }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self.scripts.timeout = timeout;
        self
    }
}

impl Default for InProcessExecutor {
    fn default() -> Self {
        Self::new(ProcessExecutor::new("dagrun"))
    }
}

#[async_trait]
impl NodeExecutor for InProcessExecutor {
    async fn invoke(&self, invocation: Invocation) -> NodeOutcome {
        let factory = match &invocation.source {
            ComponentSource::Builtin(factory) => factory.clone(),
            ComponentSource::Script(_) => return self.scripts.invoke(invocation).await,
        };

        let services = Arc::new(LocalServices::new(
            invocation.node_id.clone(),
            invocation.globals.clone(),
        ));
        let mut ctx = ComponentContext::new(invocation.node_id.clone(), services.clone())
            .with_inputs(invocation.inputs.clone())
            .with_params(invocation.params.clone());
        ctx.cancellation = invocation.cancellation.child_token();

        let params = invocation.params.clone();
        let mut task = tokio::spawn(async move {
            let component = factory.create(&params)?;
            component.run(ctx).await
        });

        let limit = self.timeout;
        let result = tokio::select! {
            biased;
            _ = invocation.cancellation.cancelled() => Err(NodeError::Cancelled),
            joined = async {
                match limit {
                    Some(limit) => tokio::time::timeout(limit, &mut task).await.ok(),
                    None => Some((&mut task).await),
                }
            } => match joined {
                Some(Ok(result)) => result,
                Some(Err(e)) => Err(NodeError::ExecutionFailed(format!("component task failed: {}", e))),
                None => Err(NodeError::Timeout {
                    limit: limit.unwrap_or_default(),
                }),
            },
        };
        task.abort();

        for (level, message) in services.take_logs() {
            invocation.events.log(level, message);
        }
        NodeOutcome {
            result,
            global_writes: services.take_writes(),
        }
    }
}
