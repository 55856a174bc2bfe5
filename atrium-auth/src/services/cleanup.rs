use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::PgConnection;
use std::sync::Arc;

use atrium_shared::clients::db::{get_conn, DbPool};
use atrium_shared::errors::AppError;

use crate::schema::refresh_tokens;
use crate::services::verification_service;
use crate::AppState;

/// Revoked refresh tokens are kept this long for auditing before removal.
const REVOKED_RETENTION_DAYS: i64 = 7;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub verification_tokens: usize,
    pub refresh_tokens: usize,
}

fn purge_refresh_tokens(conn: &mut PgConnection) -> Result<usize, AppError> {
    let now = Utc::now();
    let removed = diesel::delete(
        refresh_tokens::table.filter(
            refresh_tokens::expires_at
                .le(now)
                .or(refresh_tokens::revoked_at.le(now - Duration::days(REVOKED_RETENTION_DAYS))),
        ),
    )
    .execute(conn)?;
    Ok(removed)
}

pub fn run_cleanup(db: &DbPool) -> Result<CleanupReport, AppError> {
    let mut conn = get_conn(db)?;
    Ok(CleanupReport {
        verification_tokens: verification_service::purge_expired(&mut conn)?,
        refresh_tokens: purge_refresh_tokens(&mut conn)?,
    })
}

/// Spawn a background task that purges expired tokens every `cleanup_interval_secs`.
pub fn spawn_cleanup_task(state: Arc<AppState>) {
    let period = std::time::Duration::from_secs(state.config.cleanup_interval_secs.max(60));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);

        loop {
            interval.tick().await;

            let db = state.db.clone();
            match tokio::task::spawn_blocking(move || run_cleanup(&db)).await {
                Ok(Ok(report)) => {
                    metrics::counter!("atrium_expired_tokens_purged_total", "kind" => "verification")
                        .increment(report.verification_tokens as u64);
                    metrics::counter!("atrium_expired_tokens_purged_total", "kind" => "refresh")
                        .increment(report.refresh_tokens as u64);
                    tracing::info!(
                        verification_tokens = report.verification_tokens,
                        refresh_tokens = report.refresh_tokens,
                        "token cleanup completed"
                    );
                }
                Ok(Err(e)) => tracing::error!(error = %e, "token cleanup failed"),
                Err(e) => tracing::error!(error = %e, "token cleanup task panicked"),
            }
        }
    });
}
