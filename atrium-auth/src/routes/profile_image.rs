use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use atrium_shared::clients::db::get_conn;
use atrium_shared::errors::{AppError, AppResult, ErrorCode};
use atrium_shared::extract::Json;
use atrium_shared::types::auth::AuthUser;
use atrium_shared::types::ApiResponse;

use crate::services::{image_service, user_service};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct ImageResponse {
    pub key: String,
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct ImageUrlResponse {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct UploadUrlResponse {
    pub upload_url: String,
    pub key: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct UploadUrlQuery {
    pub file_name: Option<String>,
    pub content_type: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmUploadRequest {
    pub key: String,
}

fn upload_failed(message: impl Into<String>) -> AppError {
    AppError::new(ErrorCode::ImageUploadFailed, message)
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::new(ErrorCode::PayloadTooLarge, "image is too large")
    } else {
        AppError::bad_request(format!("failed to read multipart: {e}"))
    }
}

fn check_size(len: usize, max: usize) -> Result<(), AppError> {
    if len == 0 {
        return Err(AppError::bad_request("uploaded file is empty"));
    }
    if len > max {
        return Err(AppError::new(
            ErrorCode::PayloadTooLarge,
            format!("image exceeds the {} MiB limit", max / (1024 * 1024)),
        ));
    }
    Ok(())
}

fn require_uploaded(exists: bool, key: &str) -> Result<(), AppError> {
    if !exists {
        return Err(AppError::new(
            ErrorCode::ImageNotFound,
            format!("no uploaded image at {key}"),
        ));
    }
    Ok(())
}

/// Point the user at `key` and drop the object it replaces.
async fn replace_image(state: &AppState, user_id: uuid::Uuid, key: &str) -> Result<String, AppError> {
    let previous = {
        let mut conn = get_conn(&state.db)?;
        let previous = user_service::find_by_id(&mut conn, user_id)?.image;
        user_service::set_image(&mut conn, user_id, key)?;
        previous
    };

    image_service::delete_previous(&state.storage, previous.as_deref(), key).await;

    state
        .storage
        .presigned_get(key, state.config.presigned_url_ttl_secs)
        .await
        .map_err(|e| upload_failed(e.to_string()))
}

pub async fn upload_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<ImageResponse>>> {
    let field = loop {
        match multipart.next_field().await.map_err(multipart_error)? {
            Some(field) if field.name() == Some("file") => break field,
            Some(_) => continue,
            None => return Err(AppError::bad_request("no file provided")),
        }
    };

    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();
    let ext = image_service::extension_for(&content_type)?;

    let data = field.bytes().await.map_err(multipart_error)?;
    check_size(data.len(), state.config.max_image_bytes)?;

    let key = image_service::avatar_key(user.id, ext);
    state
        .storage
        .upload(&key, data.to_vec(), &content_type)
        .await
        .map_err(|e| upload_failed(e.to_string()))?;

    let url = replace_image(&state, user.id, &key).await?;

    metrics::counter!("atrium_profile_images_uploaded_total").increment(1);
    tracing::info!(user_id = %user.id, key = %key, bytes = data.len(), "profile image uploaded");

    Ok(Json(ApiResponse::ok(ImageResponse { key, url })))
}

/// Presigned PUT so browsers can upload straight to the bucket.
pub async fn upload_url(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<UploadUrlQuery>,
) -> AppResult<Json<ApiResponse<UploadUrlResponse>>> {
    let ext = image_service::extension_for(&query.content_type)?;
    let key = image_service::avatar_key(user.id, ext);
    let expires_in = state.config.presigned_url_ttl_secs;

    let upload_url = state
        .storage
        .presigned_put(&key, &query.content_type, expires_in)
        .await
        .map_err(|e| upload_failed(e.to_string()))?;

    tracing::debug!(user_id = %user.id, key = %key, file_name = ?query.file_name, "issued upload url");

    Ok(Json(ApiResponse::ok(UploadUrlResponse { upload_url, key, expires_in })))
}

pub async fn confirm_upload(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConfirmUploadRequest>,
) -> AppResult<Json<ApiResponse<ImageResponse>>> {
    image_service::ensure_owned_key(user.id, &req.key)?;

    let exists = state
        .storage
        .head_object(&req.key)
        .await
        .map_err(|e| upload_failed(e.to_string()))?;
    require_uploaded(exists, &req.key)?;

    let url = replace_image(&state, user.id, &req.key).await?;

    tracing::info!(user_id = %user.id, key = %req.key, "profile image confirmed");

    Ok(Json(ApiResponse::ok(ImageResponse { key: req.key, url })))
}

pub async fn get_image_url(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<ImageUrlResponse>>> {
    let image = {
        let mut conn = get_conn(&state.db)?;
        user_service::find_by_id(&mut conn, user.id)?.image
    };

    let url = image_service::resolve_image_url(
        &state.storage,
        image.as_deref(),
        &state.config.default_avatar_url,
        state.config.presigned_url_ttl_secs,
    )
    .await?;

    Ok(Json(ApiResponse::ok(ImageUrlResponse { url })))
}
