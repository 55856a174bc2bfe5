use axum::extract::{DefaultBodyLimit, FromRef};
use axum::routing::{get, post};
use axum::{middleware, Router};
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;

use atrium_shared::clients::db::DbPool;
use atrium_shared::clients::email::EmailClient;
use atrium_shared::clients::redis::RedisClient;
use atrium_shared::clients::storage::ObjectStorage;
use atrium_shared::middleware::{metrics_middleware, JwtSecret};
use config::AppConfig;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub redis: RedisClient,
    pub email: EmailClient,
    pub storage: ObjectStorage,
    /// Shared client for OAuth provider calls.
    pub http: reqwest::Client,
    pub metrics_handle: PrometheusHandle,
}

impl FromRef<AppState> for JwtSecret {
    fn from_ref(state: &AppState) -> Self {
        JwtSecret(state.config.jwt_secret.clone())
    }
}

pub fn run_migrations(conn: &mut PgConnection) -> anyhow::Result<()> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("failed to run migrations: {e}"))?;
    for version in &applied {
        tracing::info!(version = %version, "applied migration");
    }
    Ok(())
}

pub fn build_router(state: Arc<AppState>) -> Router {
    // Multipart framing needs headroom over the image itself.
    let upload_limit = state.config.max_image_bytes + 64 * 1024;

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::health::metrics))
        .route("/signup", post(routes::register::register))
        .route("/login", post(routes::login::login))
        .route("/refresh", post(routes::refresh::refresh_token))
        .route("/logout", post(routes::logout::logout))
        .route("/me", get(routes::me::me))
        .route("/verify-email", post(routes::verify_email::verify_email))
        .route("/resend-verification", post(routes::resend_verification::resend_verification))
        .route("/reset-password/request", post(routes::forgot_password::request_password_reset))
        .route("/reset-password", post(routes::reset_password::reset_password))
        .route("/change-password", post(routes::change_password::change_password))
        .route("/oauth/:provider/authorize", get(routes::oauth::authorize))
        .route("/oauth/:provider", post(routes::oauth::oauth_callback))
        .route(
            "/profile/image",
            post(routes::profile_image::upload_image)
                .get(routes::profile_image::get_image_url)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/profile/image/upload-url", get(routes::profile_image::upload_url))
        .route("/profile/image/confirm", post(routes::profile_image::confirm_upload))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
