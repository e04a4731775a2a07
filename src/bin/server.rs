use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tower::make::Shared;
use tracing_subscriber::EnvFilter;

use doc_control::activity::ActivityLogger;
use doc_control::auth::jwt::JwtService;
use doc_control::auth::policy::RolePolicy;
use doc_control::config::AppConfig;
use doc_control::db;
use doc_control::notifier::HttpEmailNotifier;
use doc_control::routes::create_router;
use doc_control::state::{AppState, Collaborators};
use doc_control::storage::S3BlobStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        server_host = %config.server_host,
        server_port = config.server_port,
        s3_bucket = %config.s3_bucket,
        email_configured = config.email.is_configured(),
        "loaded doc-control configuration"
    );
    if !config.email.is_configured() {
        tracing::warn!("EMAIL_FUNCTION_URL not set; reminder emails will fail until configured");
    }

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let applied = db::run_migrations(&pool)?;
    tracing::info!(applied, "database migrations up to date");

    let storage = Arc::new(S3BlobStore::from_config(&config).await?);
    let notifier = Arc::new(HttpEmailNotifier::new(config.email.clone()));
    let activity = ActivityLogger::spawn(pool.clone());
    let jwt = JwtService::from_config(&config)?;

    let listen_addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(
        pool,
        config,
        Collaborators {
            storage,
            notifier,
            policy: Arc::new(RolePolicy),
            activity,
        },
        jwt,
    );
    let router = create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, Shared::new(router)).await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
