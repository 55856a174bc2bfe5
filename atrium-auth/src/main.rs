use std::sync::Arc;

use atrium_auth::config::AppConfig;
use atrium_auth::services::cleanup;
use atrium_auth::{build_router, run_migrations, AppState};
use atrium_shared::clients::db::create_pool;
use atrium_shared::clients::email::EmailClient;
use atrium_shared::clients::redis::RedisClient;
use atrium_shared::clients::storage::ObjectStorage;
use atrium_shared::middleware::{init_metrics, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("atrium-auth");

    let config = AppConfig::load()?;
    let port = config.port;

    let db = create_pool(&config.database_url, config.database_pool_size)?;
    {
        let mut conn = db.get()?;
        run_migrations(&mut conn)?;
    }

    let redis = RedisClient::connect(&config.redis_url).await?;
    let email = EmailClient::new(&config.resend_api_key, &config.from_email, &config.from_name)?
        .with_api_url(&config.resend_api_url);

    let storage = ObjectStorage::new(&config.storage_settings());
    if config.storage_ensure_bucket {
        storage.ensure_bucket().await;
    }

    let metrics_handle = init_metrics()?;
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()?;

    let state = Arc::new(AppState {
        db,
        config,
        redis,
        email,
        storage,
        http,
        metrics_handle,
    });

    cleanup::spawn_cleanup_task(state.clone());

    let app = build_router(state);

    let addr = format!("0.0.0.0:{port}");
    tracing::info!(addr = %addr, "atrium-auth starting");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
