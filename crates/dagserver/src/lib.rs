//! HTTP serving boundary for one exported workflow.

pub mod project;
mod routes;

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use dagcore::{ExternalInputError, FlowError, WorkflowGraph};
use dagruntime::FlowRuntime;
use project::ProjectSpec;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

pub use routes::configure;

/// Application state shared across handlers
pub struct AppState {
    pub runtime: Arc<FlowRuntime>,
    pub workflow: WorkflowGraph,
    pub project: ProjectSpec,
}

impl AppState {
    /// Use `project` when given, otherwise derive the interface from the graph.
    pub fn new(runtime: Arc<FlowRuntime>, workflow: WorkflowGraph, project: Option<ProjectSpec>) -> Self {
        let project =
            project.unwrap_or_else(|| ProjectSpec::derive(&workflow, runtime.registry()));
        Self {
            runtime,
            workflow,
            project,
        }
    }
}

/// Server settings, read from the environment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub workflow: PathBuf,
    pub project_spec: Option<PathBuf>,
    pub components_dir: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let workflow = std::env::var("DAGRUN_WORKFLOW")
            .map(PathBuf::from)
            .map_err(|_| anyhow::anyhow!("DAGRUN_WORKFLOW must name a workflow file"))?;

        // project_spec.json next to the workflow is picked up implicitly
        let project_spec = std::env::var("DAGRUN_PROJECT_SPEC")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                let sibling = workflow.parent()?.join("project_spec.json");
                sibling.is_file().then_some(sibling)
            });

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            workflow,
            project_spec,
            components_dir: std::env::var("DAGRUN_COMPONENTS_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Error response
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    BadRequest(#[from] ExternalInputError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("Failed to stage uploads: {0}")]
    Staging(#[from] std::io::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Flow(FlowError::ExternalInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Flow(_) | ApiError::Staging(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let kind = match self.status_code() {
            StatusCode::BAD_REQUEST => "external_input",
            _ => "internal",
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error: self.to_string(),
            kind,
        })
    }
}
