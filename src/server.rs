/// Server setup and initialization
///
/// Wires together all components: storage backends, table and record services,
/// the event bus, workflow registry, dispatcher and HTTP routes.

use crate::{
    api::{create_api_routes, AppState},
    config::Config,
    data::{
        events::{EventBus, LoggingDeadLetter},
        service::{CustomDataService, PageLimits},
    },
    runtime::{ChannelBroadcaster, WorkflowDispatcher, WorkflowEngine},
    storage::{DatabaseManager, InMemoryDatabase, PgDatabase, PhysicalDatabase},
    table::{InMemoryTableRegistry, PgTableRegistry, RecordValidator, SchemaTranslator, TableRegistry, TableService},
    workflow::{
        InMemoryWorkflowStore, PgWorkflowStore, WorkflowRegistry, WorkflowService, WorkflowStore, WorkflowTableReferences,
    },
};
use anyhow::Result;
use axum::{routing::get, Router};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing_subscriber::EnvFilter;

/// The storage collaborators every service runs on
#[derive(Clone)]
pub struct Backends {
    pub tables: Arc<dyn TableRegistry>,
    pub db: Arc<dyn PhysicalDatabase>,
    pub workflows: Arc<dyn WorkflowStore>,
}

impl Backends {
    pub fn postgres(manager: &DatabaseManager) -> Self {
        let pool = manager.pool().clone();
        let schema = manager.schema().to_string();
        Self {
            tables: Arc::new(PgTableRegistry::new(pool.clone(), schema.clone())),
            db: Arc::new(PgDatabase::new(pool.clone(), schema.clone())),
            workflows: Arc::new(PgWorkflowStore::new(pool, schema)),
        }
    }

    /// Process-local backends (tests and demos)
    pub fn in_memory() -> Self {
        Self {
            tables: Arc::new(InMemoryTableRegistry::new()),
            db: Arc::new(InMemoryDatabase::new()),
            workflows: Arc::new(InMemoryWorkflowStore::new()),
        }
    }
}

/// Everything a running instance holds on to
pub struct Application {
    pub state: AppState,
    pub events: Arc<EventBus>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub registry: Arc<WorkflowRegistry>,
    pub dispatcher: JoinHandle<()>,
}

impl Application {
    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(health_check))
            .merge(create_api_routes().with_state(self.state.clone()))
    }
}

/// Build the services on top of `backends` and start the dispatcher
///
/// Registered tables are re-materialised and stored workflows loaded before
/// this returns.
pub async fn build_application(config: &Config, backends: Backends) -> Result<Application> {
    tracing::info!("🧱 Initializing schema translator for schema '{}'", config.database.schema);
    let translator = SchemaTranslator::new(config.database.schema.clone())
        .map_err(|e| anyhow::anyhow!("Invalid database schema name: {}", e))?;

    let tables = TableService::new(Arc::clone(&backends.tables), Arc::clone(&backends.db), translator)
        .with_dependents(Arc::new(WorkflowTableReferences::new(Arc::clone(&backends.workflows))));
    tables
        .materialize_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to materialize registered tables: {}", e))?;

    tracing::info!("📨 Initializing event bus (buffer {})", config.runtime.event_buffer);
    let (bus, event_rx) = EventBus::new(config.runtime.event_buffer, Arc::new(LoggingDeadLetter));
    let events = Arc::new(bus.with_overflow_wait(Duration::from_millis(config.runtime.event_overflow_wait_ms)));

    let data = Arc::new(CustomDataService::new(
        Arc::clone(&backends.tables),
        Arc::clone(&backends.db),
        events.clone(),
        RecordValidator::new(config.runtime.precision_policy),
        PageLimits {
            default_size: config.paging.default_page_size,
            max_size: config.paging.max_page_size,
        },
    ));

    tracing::info!("📊 Initializing workflow registry");
    let registry = Arc::new(WorkflowRegistry::new(Arc::clone(&backends.workflows)));
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load workflows from storage: {}", e))?;

    tracing::info!("🚀 Initializing workflow engine");
    let broadcaster = Arc::new(ChannelBroadcaster::new(config.runtime.event_buffer));
    let engine = Arc::new(WorkflowEngine::new(
        data.clone(),
        broadcaster.clone(),
        Duration::from_millis(config.runtime.action_timeout_ms),
    ));
    let dispatcher = Arc::new(WorkflowDispatcher::new(
        Arc::clone(&registry),
        engine,
        Arc::clone(&backends.workflows),
        config.runtime.max_chain_depth,
    ))
    .spawn(event_rx);

    let workflows = WorkflowService::new(
        Arc::clone(&backends.workflows),
        Arc::clone(&registry),
        Arc::clone(&backends.tables),
    );

    tracing::info!("✅ Application initialized successfully");
    Ok(Application {
        state: AppState { tables, data, workflows },
        events,
        broadcaster,
        registry,
        dispatcher,
    })
}

/// Create the main Axum application against Postgres
pub async fn create_app(config: &Config) -> Result<Router> {
    tracing::info!("🗄️ Connecting to database");
    let manager = DatabaseManager::connect(&config.database).await?;
    manager.init_schema().await?;

    let app = build_application(config, Backends::postgres(&manager)).await?;
    Ok(app.router())
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting tabflow server...");

    let app = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
