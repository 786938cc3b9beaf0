use crate::{ApiError, AppState};
use actix_web::{get, post, web, HttpResponse, Responder, Result as ActixResult};
use actix_ws::Message;
use dagcore::{ExternalInputError, Value};
use dagruntime::{NodeReport, RunOptions};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health_check)
        .service(schema)
        .service(run)
        .service(list_components)
        .service(websocket_events);
}

/// Request body for `/run`
#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    inputs: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct RunResponse<'a> {
    execution_id: String,
    outputs: IndexMap<String, Value>,
    /// Full output table, keyed by node id
    nodes: &'a IndexMap<String, dagcore::PortValues>,
    report: &'a IndexMap<String, NodeReport>,
    success: bool,
}

/// Health check endpoint
#[get("/health")]
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "dagrun"
    }))
}

#[get("/schema")]
async fn schema(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.project.schema())
}

/// Run the workflow once with the caller's inputs
#[post("/run")]
async fn run(data: web::Data<AppState>, body: web::Bytes) -> Result<HttpResponse, ApiError> {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ExternalInputError::Malformed(e.to_string()))?
    };

    // Lives until the run has finished with the staged files
    let staging = tempfile::tempdir()?;
    let external = data.project.resolve(&request.inputs, staging.path())?;

    info!(inputs = request.inputs.len(), "Running workflow");
    let result = data
        .runtime
        .execute(&data.workflow, RunOptions::new().with_external(external))
        .await
        .map_err(|e| {
            error!("Workflow run failed: {}", e);
            ApiError::from(e)
        })?;
    info!(
        execution_id = %result.execution_id,
        succeeded = result.succeeded(),
        failed = result.failed(),
        "Workflow run finished"
    );

    Ok(HttpResponse::Ok().json(RunResponse {
        execution_id: result.execution_id.to_string(),
        outputs: data.project.collect_outputs(&result),
        nodes: &result.outputs,
        report: &result.reports,
        success: result.is_success(),
    }))
}

/// List available components
#[get("/api/components")]
async fn list_components(data: web::Data<AppState>) -> impl Responder {
    let registry = data.runtime.registry();
    let components: Vec<_> = registry
        .list()
        .into_iter()
        .filter_map(|key| {
            let component = registry.get(&key)?;
            Some(serde_json::json!({
                "key": key,
                "descriptor": component.descriptor.as_ref(),
                "location": component.source.location().map(|p| p.display().to_string()),
            }))
        })
        .collect();

    HttpResponse::Ok().json(components)
}

/// WebSocket endpoint for real-time events
#[get("/api/events")]
async fn websocket_events(
    req: actix_web::HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let (res, mut session, mut msg_stream) = actix_ws::handle(&req, stream)?;

    info!("WebSocket client connected");

    let mut events = data.runtime.subscribe_events();

    actix_web::rt::spawn(async move {
        loop {
            tokio::select! {
                event = events.recv() => {
                    match event {
                        Ok(event) => {
                            if let Ok(json) = serde_json::to_string(&event) {
                                if session.text(json).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!("WebSocket client lagged, dropped {} events", n);
                        }
                        Err(_) => break,
                    }
                }

                Some(Ok(msg)) = msg_stream.recv() => {
                    match msg {
                        Message::Ping(bytes) => {
                            if session.pong(&bytes).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }

                else => break,
            }
        }

        info!("WebSocket client disconnected");
        let _ = session.close(None).await;
    });

    Ok(res)
}
