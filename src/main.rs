use axum::{routing::get, Router};
use phonenumber::country::Id as CountryId;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_leads_api::assignment::LeadAssignmentStateMachine;
use rust_leads_api::clock::{Clock, SystemClock};
use rust_leads_api::config::Config;
use rust_leads_api::db::Database;
use rust_leads_api::db_storage::PgStore;
use rust_leads_api::directory::{Directory, RandomNipGenerator};
use rust_leads_api::handlers::{self, AppState};
use rust_leads_api::intake::{IntakeSettings, LeadIntake};
use rust_leads_api::prediction::{oracle_from_config, PredictionOracle};
use rust_leads_api::reporting::TargetRollupReporter;
use rust_leads_api::store::Store;
use rust_leads_api::targets::TargetAllocator;

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool and migrations, the prediction
/// oracle and the domain services, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_leads_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection pool established");

    if config.run_migrations {
        db.migrate().await?;
    }

    let oracle: Arc<dyn PredictionOracle> = Arc::from(
        oracle_from_config(
            &config.prediction,
            Duration::from_secs(config.prediction_timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!("{}", e))?,
    );
    tracing::info!("Prediction oracle initialized");

    let phone_region: CountryId = config
        .phone_region
        .parse()
        .map_err(|_| anyhow::anyhow!("unknown PHONE_REGION {}", config.phone_region))?;

    let store: Arc<dyn Store> = Arc::new(PgStore::new(db.pool.clone()));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Build application state
    let app_state = Arc::new(AppState {
        directory: Directory::new(store.clone(), clock.clone(), Arc::new(RandomNipGenerator)),
        intake: LeadIntake::new(
            store.clone(),
            clock.clone(),
            oracle,
            IntakeSettings {
                recommendation_limit: config.recommendation_limit,
                phone_region,
            },
        ),
        targets: TargetAllocator::new(store.clone()),
        reporting: TargetRollupReporter::new(store.clone()),
        assignments: LeadAssignmentStateMachine::new(store, clock),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes().layer(
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

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
