//! Child side of the process boundary for built-in components.
//!
//! `dagrun worker` reads one [`WorkerRequest`] from stdin, runs the
//! component and writes protocol lines to stdout. Diagnostics belong on
//! stderr; stdout carries nothing but protocol messages.

use crate::registry::{ComponentRegistry, ComponentSource};
use dagcore::protocol::{FailureKind, WorkerMessage, WorkerRequest};
use dagcore::{ComponentContext, LogLevel, NodeError, NodeServices, Value};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

/// Serve a single request on stdin/stdout.
pub async fn run_worker(registry: &ComponentRegistry) -> io::Result<()> {
    let mut request = Vec::new();
    tokio::io::stdin().read_to_end(&mut request).await?;
    let out = Arc::new(Mutex::new(io::stdout()));
    handle_request(registry, &request, out).await?;
    Ok(())
}

/// Run one encoded request, writing protocol lines to `out`.
///
/// Returns whether the component produced a result.
pub async fn handle_request<W>(
    registry: &ComponentRegistry,
    request: &[u8],
    out: Arc<Mutex<W>>,
) -> io::Result<bool>
where
    W: Write + Send + 'static,
{
    let request: WorkerRequest = match serde_json::from_slice(request) {
        Ok(request) => request,
        Err(e) => {
            let msg = WorkerMessage::Error {
                kind: FailureKind::Serialization,
                message: format!("malformed request: {}", e),
                trace: None,
            };
            write(&out, &msg)?;
            return Ok(false);
        }
    };

    let result = run_request(registry, &request, out.clone()).await;
    match result {
        Ok(outputs) => {
            write(&out, &WorkerMessage::Result { outputs })?;
            Ok(true)
        }
        Err(e) => {
            tracing::debug!(node_id = %request.node_id, "Component failed: {}", e);
            write(&out, &WorkerMessage::from_node_error(&e))?;
            Ok(false)
        }
    }
}

async fn run_request<W>(
    registry: &ComponentRegistry,
    request: &WorkerRequest,
    out: Arc<Mutex<W>>,
) -> Result<dagcore::PortValues, NodeError>
where
    W: Write + Send + 'static,
{
    let registered = registry.get(&request.component).ok_or_else(|| {
        NodeError::Import(format!("component '{}' is not available in this worker", request.component))
    })?;
    let factory = match &registered.source {
        ComponentSource::Builtin(factory) => factory.clone(),
        ComponentSource::Script(entry) => {
            return Err(NodeError::Import(format!(
                "'{}' is a script component ({}); run it directly",
                request.component,
                entry.path.display()
            )))
        }
    };

    let params = registered.descriptor.validate_params(&request.params)?;
    let component = factory.create(&params)?;
    let services = Arc::new(WorkerServices {
        out,
        globals: Mutex::new(request.globals.clone()),
    });
    let ctx = ComponentContext::new(request.node_id.clone(), services)
        .with_inputs(request.inputs.clone())
        .with_params(params);
    component.run(ctx).await
}

fn write<W: Write>(out: &Mutex<W>, msg: &WorkerMessage) -> io::Result<()> {
    let mut out = out
        .lock()
        .map_err(|_| io::Error::other("stdout lock poisoned"))?;
    msg.write_line(&mut *out)
}

/// Services backed by protocol messages.
struct WorkerServices<W> {
    out: Arc<Mutex<W>>,
    globals: Mutex<HashMap<String, Value>>,
}

impl<W: Write + Send> NodeServices for WorkerServices<W> {
    fn log(&self, level: LogLevel, message: &str) {
        let msg = WorkerMessage::Log {
            level,
            message: message.to_string(),
        };
        if let Err(e) = write(&self.out, &msg) {
            tracing::warn!("Failed to forward log line: {}", e);
        }
    }

    fn get_global(&self, key: &str) -> Option<Value> {
        self.globals.lock().ok()?.get(key).cloned()
    }

    fn set_global(&self, key: &str, value: Value) {
        if let Ok(mut globals) = self.globals.lock() {
            globals.insert(key.to_string(), value.clone());
        }
        let msg = WorkerMessage::SetGlobal {
            key: key.to_string(),
            value,
        };
        if let Err(e) = write(&self.out, &msg) {
            tracing::warn!("Failed to forward global write: {}", e);
        }
    }
}
