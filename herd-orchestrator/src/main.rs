use herd_backend::{LoadTestBackend, LocalBackend, SlurmBackend};
use herd_core::backend::BackendPort;
use herd_orchestrator::config::{BackendKind, Config};
use herd_orchestrator::listener::{ListenerRegistry, LoggingListener};
use herd_orchestrator::render::{CommandRenderer, ContainerWrapper};
use herd_orchestrator::repository::{JobStore, MemoryJobStore, PgJobStore};
use herd_orchestrator::service::Orchestrator;
use herd_orchestrator::{api, db};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Owner listener id and subscription that log every event
const LOG_LISTENER: &str = "log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "herd_orchestrator=debug,herd_backend=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Herd Orchestrator...");

    let config = Config::from_env()?;
    config.validate()?;

    let store: Arc<dyn JobStore> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url).await?;
            db::run_migrations(&pool).await?;
            Arc::new(PgJobStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, jobs are kept in memory only");
            Arc::new(MemoryJobStore::new())
        }
    };

    // in-process backends report lifecycle events over a channel
    let (backend, events) = match config.backend {
        BackendKind::Slurm => {
            let backend: Arc<dyn BackendPort> = Arc::new(SlurmBackend::new(config.slurm_config()));
            (backend, None)
        }
        BackendKind::Local => {
            let (backend, events) = LocalBackend::new(config.local_config());
            let backend: Arc<dyn BackendPort> = Arc::new(backend);
            (backend, Some(events))
        }
        BackendKind::LoadTest => {
            let (backend, events) = LoadTestBackend::new(config.loadtest_config());
            let backend: Arc<dyn BackendPort> = Arc::new(backend);
            (backend, Some(events))
        }
    };
    tracing::info!("Using {} backend", backend.name());

    let listeners = Arc::new(ListenerRegistry::new());
    let logging = Arc::new(LoggingListener);
    listeners.subscribe(logging.clone());
    listeners.register_owner_listener(LOG_LISTENER, logging);

    let renderer = CommandRenderer::new(
        backend.dialect(),
        ContainerWrapper::new(config.container_runtime.clone(), config.data_root.clone()),
        config.container_profiles.clone(),
    );
    let orchestrator = Arc::new(Orchestrator::new(store, backend, listeners, renderer));

    if let Some(events) = events {
        tokio::spawn(orchestrator.clone().drive(events));
    }

    // Build router with all API endpoints
    let app = api::create_router(orchestrator);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
