use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use healthy_pay_settlement::api::{self, AppState};
use healthy_pay_settlement::config::AppConfig;
use healthy_pay_settlement::database::memory::InMemoryStore;
use healthy_pay_settlement::database::store::Stores;
use healthy_pay_settlement::database::{init_pool_from_config, run_migrations};
use healthy_pay_settlement::health::{HealthChecker, HealthState, HealthStatus};
use healthy_pay_settlement::logging::init_tracing_with;
use healthy_pay_settlement::middleware::logging::{request_logging_middleware, UuidRequestId};
use healthy_pay_settlement::payments::factory::PspRegistry;
use healthy_pay_settlement::services::exchange_rate::ExchangeRateService;
use healthy_pay_settlement::services::{PspService, SettlementEngine};
use healthy_pay_settlement::workers::reconciliation::ReconciliationWorker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing_with(&config.logging);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        skip_externals = config.skip_externals,
        "Starting healthy-pay settlement service"
    );

    // Storage: Postgres, or the in-memory store when externals are skipped
    let (db_pool, stores) = match &config.database {
        None => {
            warn!("SKIP_EXTERNALS=true, serving from the in-memory store; nothing is persisted");
            (None, Stores::in_memory(Arc::new(InMemoryStore::new())))
        }
        Some(database) => {
            let pool = init_pool_from_config(database).await.map_err(|e| {
                error!(error = %e, "Failed to initialize database pool");
                e
            })?;
            info!(
                max_connections = database.max_connections,
                "Database connection pool initialized"
            );
            if config.run_migrations {
                run_migrations(&pool).await?;
            }
            (Some(pool.clone()), Stores::postgres(pool))
        }
    };

    // Providers, built once and shared
    let registry = Arc::new(PspRegistry::from_env()?);
    info!(
        providers = ?registry.available(),
        default = %registry.default_provider(),
        "Payment providers registered"
    );
    let psp = Arc::new(PspService::new(
        registry,
        stores.audit.clone(),
        stores.ledger.clone(),
    ));

    let engine = Arc::new(SettlementEngine::new(
        stores,
        psp.clone(),
        ExchangeRateService::new(),
        config.settlement.clone(),
    ));

    // Reconciliation sweep
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let worker = ReconciliationWorker::new(engine.clone(), config.reconciliation.clone());
    let worker_handle = tokio::spawn(worker.clone().run(worker_shutdown_rx));

    let state = AppState {
        engine,
        worker,
        health_checker: HealthChecker::new(db_pool, psp),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .merge(api::router())
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "Failed to bind");
        e
    })?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await?;

    let _ = worker_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .is_err()
    {
        error!("Timed out waiting for reconciliation worker shutdown");
    }

    info!("Server shutdown complete");
    Ok(())
}

// Handlers
async fn root() -> &'static str {
    "healthy-pay settlement service"
}

async fn health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if health_status.status == HealthState::Unhealthy {
        error!(checks = ?health_status.checks, "Health check failed");
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(health_status)))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: State<AppState>,
) -> Result<Json<HealthStatus>, (StatusCode, Json<HealthStatus>)> {
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
