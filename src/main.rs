use std::net::SocketAddr;
use std::sync::Arc;

use rust_lead_sync::config::Config;
use rust_lead_sync::db::Database;
use rust_lead_sync::db_storage::LeadStorage;
use rust_lead_sync::handlers::{self, AppState};
use rust_lead_sync::lead_sync::LeadSyncService;
use rust_lead_sync::list_cache::ListCache;
use rust_lead_sync::mailchimp_client::MailchimpClient;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// Initializes logging, configuration, the database pool, the Mailchimp
/// client with its list cache, then serves the lead routes.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url).await?;
    tracing::info!("Database connection pool established");

    // Target list is resolved lazily on the first subscribe/unsubscribe
    let list_cache = ListCache::new(config.mailchimp.cache_key.clone());
    let mailchimp = MailchimpClient::new(&config.mailchimp, list_cache)?;
    tracing::info!("✓ Mailchimp client initialized: {}", config.mailchimp.base_url);

    let app_state = Arc::new(AppState {
        leads: LeadSyncService::new(
            Arc::new(LeadStorage::new(db.pool.clone())),
            Arc::new(mailchimp),
        ),
    });

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    // Mutating routes hit the provider, so they are the ones rate limited
    let protected_routes = handlers::lead_routes().layer(
        ServiceBuilder::new()
            // Request size limit: 1MB max payload
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    let app = handlers::public_routes()
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
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
