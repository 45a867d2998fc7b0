//! deposit-accrual server entry point.
//!
//! Connects the store, resumes every active deposit, then serves the REST
//! API until interrupted.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use deposit_accrual::api;
use deposit_accrual::app_state::AppState;
use deposit_accrual::config::{AccrualConfig, LogFormat};
use deposit_accrual::domain::{Clock, EventBus};
use deposit_accrual::notification::TracingNotifier;
use deposit_accrual::persistence::event_log::spawn_event_log;
use deposit_accrual::persistence::{AccrualStore, MemoryStore, PlanCatalog, PostgresStore};
use deposit_accrual::service::DepositService;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = AccrualConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting deposit-accrual");

    let event_bus = EventBus::new(config.event_bus_capacity);

    // Build persistence layer
    let (store, plans): (Arc<dyn AccrualStore>, Arc<dyn PlanCatalog>) =
        if config.persistence_enabled {
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .min_connections(config.database_min_connections)
                .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
                .connect(&config.database_url)
                .await?;
            sqlx::migrate!("./migrations").run(&pool).await?;
            tracing::info!("database migrations applied");

            let pg = Arc::new(PostgresStore::new(pool));
            if config.event_log_enabled {
                let _event_log = spawn_event_log(&event_bus, Arc::clone(&pg));
            }
            (
                Arc::clone(&pg) as Arc<dyn AccrualStore>,
                pg as Arc<dyn PlanCatalog>,
            )
        } else {
            tracing::warn!("persistence disabled, using in-memory store");
            let memory = Arc::new(MemoryStore::new());
            (
                Arc::clone(&memory) as Arc<dyn AccrualStore>,
                memory as Arc<dyn PlanCatalog>,
            )
        };

    // Build service layer
    let deposit_service = Arc::new(DepositService::new(
        store,
        plans,
        Arc::new(TracingNotifier),
        event_bus,
        Clock::system(),
        config.engine_settings(),
    ));
    tracing::info!(
        catch_up = config.catch_up_policy.as_str(),
        stagger_secs = config.resume_stagger_secs,
        "resuming active deposits"
    );
    deposit_service.resume_all().await;

    // Build router
    let app_state = AppState {
        deposit_service: Arc::clone(&deposit_service),
    };
    let router = api::build_router();
    #[cfg(feature = "swagger-ui")]
    let router = {
        use utoipa::OpenApi;
        router.merge(
            utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", api::ApiDoc::openapi()),
        )
    };
    let app = Router::new()
        .merge(router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    deposit_service.shutdown();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
