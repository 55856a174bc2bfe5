use axum::extract::State;
use axum::response::{IntoResponse, Response};
use diesel::RunQueryDsl;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::extract::Json;
use atrium_shared::{HealthCheck, HealthResponse, HealthStatus};

use crate::AppState;

/// Liveness plus database, Redis and object storage reachability.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Response {
    let database = match get_conn(&state.db)
        .and_then(|mut conn| Ok(diesel::sql_query("SELECT 1").execute(&mut conn)?))
    {
        Ok(_) => HealthCheck::healthy("database"),
        Err(e) => HealthCheck::unhealthy("database", e.to_string()),
    };

    let redis = match state.redis.ping().await {
        Ok(()) => HealthCheck::healthy("redis"),
        Err(e) => HealthCheck::unhealthy("redis", e.to_string()),
    };

    // Sign-in keeps working without the bucket, so storage only degrades.
    let storage = match state.storage.head_bucket().await {
        Ok(()) => HealthCheck::healthy("storage"),
        Err(e) => HealthCheck {
            name: "storage".to_string(),
            status: HealthStatus::Degraded,
            message: Some(e.to_string()),
        },
    };

    let response = HealthResponse::healthy("atrium-auth", env!("CARGO_PKG_VERSION"))
        .with_checks(vec![database, redis, storage]);

    (response.http_status(), Json(response)).into_response()
}

/// Returns Prometheus metrics.
pub async fn metrics(State(state): State<Arc<AppState>>) -> String {
    state.metrics_handle.render()
}
