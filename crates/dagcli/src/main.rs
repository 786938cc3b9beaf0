mod overrides;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dagcore::{ExecutionEvent, LogLevel, WorkflowDocument};
use dagruntime::{
    build_order, ComponentRegistry, ConflictPolicy, ExecutionResult, FailurePolicy, FlowRuntime,
    IsolationMode, NodeStatus, RunOptions, RuntimeConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dagrun")]
#[command(about = "Dependency-ordered workflow runner", long_about = None)]
struct Cli {
    /// Show debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        file: PathBuf,

        /// Input override, NODE.PORT=VALUE (VALUE is JSON or plain text)
        #[arg(short, long = "input", value_name = "NODE.PORT=VALUE")]
        inputs: Vec<String>,

        /// Property override, NODE.KEY=VALUE
        #[arg(short, long = "param", value_name = "NODE.KEY=VALUE")]
        params: Vec<String>,

        /// Directory tree to scan for component definitions
        #[arg(short, long, env = "DAGRUN_COMPONENTS_DIR")]
        components: Vec<PathBuf>,

        /// Run built-in components on tasks inside this process
        #[arg(long)]
        in_process: bool,

        /// Maximum number of nodes running at once
        #[arg(long, env = "DAGRUN_MAX_PARALLEL")]
        parallel: Option<usize>,

        /// Per-node timeout in seconds, 0 for none [default: 300]
        #[arg(long, env = "DAGRUN_NODE_TIMEOUT")]
        timeout: Option<u64>,

        /// Skip every node downstream of a failure
        #[arg(long)]
        fail_closed: bool,

        /// Print the execution result as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow file for unknown components and cycles
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,

        #[arg(short, long, env = "DAGRUN_COMPONENTS_DIR")]
        components: Vec<PathBuf>,
    },

    /// List available components
    Components {
        #[arg(short, long, env = "DAGRUN_COMPONENTS_DIR")]
        components: Vec<PathBuf>,
    },

    /// Serve one node request on stdin/stdout
    #[command(hide = true)]
    Worker,
}

/// Logs always go to stderr; stdout belongs to command output and, for the
/// worker, to the wire protocol.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run {
            file,
            inputs,
            params,
            components,
            in_process,
            parallel,
            timeout,
            fail_closed,
            json,
        } => {
            let mut config = RuntimeConfig::from_env();
            if let Some(n) = parallel {
                config.max_parallel_nodes = n.max(1);
            }
            if let Some(secs) = timeout {
                config.node_timeout = (secs > 0).then(|| Duration::from_secs(secs));
            }
            if fail_closed {
                config.failure_policy = FailurePolicy::SkipDependents;
            }
            if in_process {
                config.isolation = IsolationMode::InProcess;
            }
            let external = overrides::collect(&inputs, &params)?;
            let registry = build_registry(&components, config.conflict_policy);
            let result = run_workflow(&file, registry, config, external, json).await?;
            if !result.is_success() {
                bail!("{} node(s) failed", result.failed());
            }
        }

        Commands::Validate { file, components } => {
            let registry = build_registry(&components, RuntimeConfig::from_env().conflict_policy);
            validate_workflow(&file, &registry)?;
        }

        Commands::Components { components } => {
            let registry = build_registry(&components, RuntimeConfig::from_env().conflict_policy);
            list_components(&registry);
        }

        Commands::Worker => {
            let mut registry = ComponentRegistry::new();
            dagnodes::register_all(&mut registry);
            dagruntime::worker::run_worker(&registry).await?;
        }
    }

    Ok(())
}

fn build_registry(roots: &[PathBuf], policy: ConflictPolicy) -> ComponentRegistry {
    let mut registry = ComponentRegistry::with_policy(policy);
    dagnodes::register_all(&mut registry);
    for root in roots {
        let report = registry.scan(root);
        for failure in &report.failures {
            eprintln!("⚠️  {}", failure);
        }
    }
    registry
}

async fn run_workflow(
    file: &Path,
    registry: ComponentRegistry,
    config: RuntimeConfig,
    external: dagruntime::ExternalInputs,
    json: bool,
) -> Result<ExecutionResult> {
    let runtime = FlowRuntime::new(Arc::new(registry), config)?;
    let workflow = runtime
        .load_workflow(file)
        .with_context(|| format!("loading {}", file.display()))?;

    if !json {
        println!("🚀 Loaded workflow from: {}", file.display());
        println!("📋 Workflow: {}", workflow.name.as_deref().unwrap_or("(unnamed)"));
        println!("   Nodes: {}", workflow.nodes.len());
        println!("   Connections: {}", workflow.connections.len());
        println!();
    }

    let mut events = runtime.subscribe_events();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let done = matches!(event, ExecutionEvent::WorkflowCompleted { .. });
            if !json {
                print_event(event);
            }
            if done {
                break;
            }
        }
    });

    let cancellation = CancellationToken::new();
    let ctrl_c = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("🛑 Interrupted, cancelling run");
            ctrl_c.cancel();
        }
    });

    let result = runtime
        .execute(&workflow, RunOptions::new().with_external(external).with_cancellation(cancellation))
        .await;

    match result {
        Ok(result) => {
            let _ = tokio::time::timeout(Duration::from_secs(1), event_task).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_summary(&result);
            }
            Ok(result)
        }
        Err(e) => {
            event_task.abort();
            Err(e.into())
        }
    }
}

fn print_event(event: ExecutionEvent) {
    match event {
        ExecutionEvent::WorkflowStarted { total_nodes, .. } => {
            println!("▶️  Workflow started ({} nodes)", total_nodes);
        }
        ExecutionEvent::NodeStarted { node_id, component, .. } => {
            println!("  ⚡ Starting node: {} ({})", node_id, component);
        }
        ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
            println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            println!("  ❌ Node {} failed: {}", node_id, error);
        }
        ExecutionEvent::NodeSkipped { node_id, reason, .. } => {
            println!("  ⏭️  Node {} skipped: {}", node_id, reason);
        }
        ExecutionEvent::NodeLog { node_id, level, message, .. } => match level {
            LogLevel::Warn | LogLevel::Error => println!("     ⚠️  [{}] {}", node_id, message),
            _ => println!("     ℹ️  [{}] {}", node_id, message),
        },
        ExecutionEvent::WorkflowCompleted { failed, duration_ms, .. } => {
            if failed == 0 {
                println!("✨ Workflow completed successfully in {}ms", duration_ms);
            } else {
                println!("💥 Workflow finished with {} failed node(s) after {}ms", failed, duration_ms);
            }
        }
    }
}

fn print_summary(result: &ExecutionResult) {
    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!(
        "   Succeeded: {}  Failed: {}  Skipped: {}",
        result.succeeded(),
        result.failed(),
        result.count(NodeStatus::Skipped)
    );

    let produced: Vec<_> = result.outputs.iter().filter(|(_, bag)| !bag.is_empty()).collect();
    if !produced.is_empty() {
        println!();
        println!("📤 Outputs:");
        for (node_id, outputs) in produced {
            println!("   Node {}:", node_id);
            let mut ports: Vec<_> = outputs.iter().collect();
            ports.sort_by(|a, b| a.0.cmp(b.0));
            for (port, value) in ports {
                println!("     {}: {}", port, value);
            }
        }
    }
}

fn validate_workflow(file: &Path, registry: &ComponentRegistry) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let document = WorkflowDocument::from_path(file)?;
    let declared = document.graph.nodes.len();
    let workflow = document.into_graph(|key| registry.contains(key))?;
    workflow.validate()?;
    let order = build_order(&workflow.node_ids(), &workflow.connections)?;

    println!("✅ Workflow is valid:");
    println!("   Nodes: {} ({} skipped)", workflow.nodes.len(), declared - workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Order: {}", order.join(" → "));
    Ok(())
}

fn list_components(registry: &ComponentRegistry) {
    println!("📦 Available Components:");
    println!();

    for key in registry.list() {
        let Some(component) = registry.get(&key) else {
            continue;
        };
        let descriptor = &component.descriptor;
        match component.source.location() {
            Some(path) => println!("  • {} ({})", key, path.display()),
            None => println!("  • {}", key),
        }
        if !descriptor.description.is_empty() {
            println!("    {}", descriptor.description);
        }
        let inputs: Vec<_> = descriptor.inputs.iter().map(|p| p.name.as_str()).collect();
        let outputs: Vec<_> = descriptor.outputs.iter().map(|p| p.name.as_str()).collect();
        println!("    in: [{}]  out: [{}]", inputs.join(", "), outputs.join(", "));
    }
}
