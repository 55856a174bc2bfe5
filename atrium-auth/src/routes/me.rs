use axum::extract::State;
use serde::Serialize;
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::AppResult;
use atrium_shared::extract::Json;
use atrium_shared::types::auth::AuthUser;
use atrium_shared::types::ApiResponse;

use crate::services::{image_service, user_service};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: uuid::Uuid,
    pub name: Option<String>,
    pub email: String,
    pub email_verified: Option<chrono::DateTime<chrono::Utc>>,
    pub image_url: String,
    pub has_password: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub async fn me(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<MeResponse>>> {
    let record = {
        let mut conn = get_conn(&state.db)?;
        user_service::find_by_id(&mut conn, user.id)?
    };

    let image_url = image_service::resolve_image_url(
        &state.storage,
        record.image.as_deref(),
        &state.config.default_avatar_url,
        state.config.presigned_url_ttl_secs,
    )
    .await?;

    Ok(Json(ApiResponse::ok(MeResponse {
        id: record.id,
        has_password: record.has_password(),
        name: record.name,
        email: record.email,
        email_verified: record.email_verified,
        image_url,
        created_at: record.created_at,
    })))
}
