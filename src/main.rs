use axum::{
    routing::{get, post},
    Router,
};
use overdue_settlement::batch::BatchRunner;
use overdue_settlement::config::Config;
use overdue_settlement::db::Database;
use overdue_settlement::db_storage::{PgSettlementStore, SettlementStore};
use overdue_settlement::handlers::{self, AppState};
use overdue_settlement::payments::PaymentService;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the settlement service.
///
/// Initializes tracing, configuration, the database pool and the settlement
/// pipelines, then serves the batch trigger and the interactive charge
/// endpoint. Scheduling is external: a cron job calls the batch endpoint
/// (or runs `run-overdue-batch`) once a day.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "overdue_settlement=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    let store: Arc<dyn SettlementStore> = Arc::new(PgSettlementStore::new(db.pool.clone()));

    let payments = PaymentService::from_config(&config, store.clone())?;
    let runner = BatchRunner::from_config(&config, store.clone())?;
    tracing::info!(
        "✓ Settlement pipelines ready (charges: {}, calls: {})",
        config.gateway.is_some(),
        config.telephony.is_some()
    );

    let app_state = Arc::new(AppState {
        store,
        runner: Arc::new(runner),
        payments,
    });

    // 5 requests/second per IP, burst of 10
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = Router::new()
        .route("/api/v1/overdue/run", get(handlers::run_overdue_batch))
        .route("/api/v1/payments/charge", post(handlers::charge_payment))
        .layer(
            ServiceBuilder::new()
                // Request size limit: 1MB max payload
                .layer(RequestBodyLimitLayer::new(1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
