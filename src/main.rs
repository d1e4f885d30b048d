use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_admissions_engine::config::Config;
use rust_admissions_engine::db::Database;
use rust_admissions_engine::db_storage::AdmissionsStorage;
use rust_admissions_engine::engine::AdmissionsEngine;
use rust_admissions_engine::handlers::{self, AppState};
use rust_admissions_engine::notifications::{
    LogNotifier, NotificationDispatcher, Notifier, RetryPolicy, WebhookNotifier,
};
use rust_admissions_engine::pii::PiiCodec;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the database pool, the PII codec and the
/// notification worker, then serves the admissions API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_admissions_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let codec = Arc::new(
        PiiCodec::from_hex(&config.pii_encryption_key)
            .map_err(|e| anyhow::anyhow!("Invalid PII_ENCRYPTION_KEY: {}", e))?,
    );

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");
    db.ensure_schema().await?;

    let notifier: Arc<dyn Notifier> = match &config.notification_webhook_url {
        Some(url) => Arc::new(
            WebhookNotifier::new(url.clone(), config.notification_token.clone())
                .map_err(|e| anyhow::anyhow!("{}", e))?,
        ),
        None => {
            tracing::warn!("NOTIFICATION_WEBHOOK_URL not set, notifications are only logged");
            Arc::new(LogNotifier)
        }
    };
    let (dispatcher, _worker) = NotificationDispatcher::spawn(notifier, RetryPolicy::default());

    let storage = Arc::new(AdmissionsStorage::new(db.pool.clone(), codec));
    let engine =
        AdmissionsEngine::new(storage, config.engine_settings()).with_notifications(dispatcher);
    let app_state = Arc::new(AppState { engine });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes::<AdmissionsStorage>().layer(
        ServiceBuilder::new()
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
