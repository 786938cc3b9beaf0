use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dagruntime::{ComponentRegistry, FlowRuntime, RuntimeConfig};
use dagserver::{configure, project::ProjectSpec, AppState, ServerConfig};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // The server binary doubles as the worker for built-in components
    if std::env::args().nth(1).as_deref() == Some("worker") {
        let mut registry = ComponentRegistry::new();
        dagnodes::register_all(&mut registry);
        dagruntime::worker::run_worker(&registry).await?;
        return Ok(());
    }

    info!("🚀 Starting dagrun server");
    let config = ServerConfig::from_env()?;
    let runtime_config = RuntimeConfig::from_env();

    let mut registry = ComponentRegistry::with_policy(runtime_config.conflict_policy);
    dagnodes::register_all(&mut registry);
    if let Some(dir) = &config.components_dir {
        let report = registry.scan(dir);
        info!(
            "✅ Scanned {}: {} components, {} failures",
            dir.display(),
            report.registered.len(),
            report.failures.len()
        );
    }

    let runtime = FlowRuntime::new(Arc::new(registry), runtime_config)?;
    let workflow = runtime.load_workflow(&config.workflow)?;
    let project = match &config.project_spec {
        Some(path) => {
            info!("📋 Using project spec {}", path.display());
            Some(ProjectSpec::from_path(path)?)
        }
        None => None,
    };

    let app_state = web::Data::new(AppState::new(Arc::new(runtime), workflow, project));
    info!(
        "✅ Serving {} with {} inputs and {} outputs",
        config.workflow.display(),
        app_state.project.inputs.len(),
        app_state.project.outputs.len()
    );
    info!("🌐 Server starting on http://{}", config.bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(configure)
    })
    .bind(&config.bind_address)?
    .run()
    .await?;

    Ok(())
}
