//! Profile picture keys and URL resolution. Pictures live in the object store
//! under `avatars/{user_id}/`; a `users.image` value is either such a key or an
//! absolute URL handed over by an OAuth provider.

use uuid::Uuid;

use atrium_shared::clients::storage::ObjectStorage;
use atrium_shared::errors::{AppError, ErrorCode};

const AVATAR_PREFIX: &str = "avatars";

pub const ACCEPTED_TYPES: &str = "jpeg, png, webp, gif";

/// File extension for an accepted image content type.
pub fn extension_for(content_type: &str) -> Result<&'static str, AppError> {
    match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        "image/gif" => Ok("gif"),
        other => Err(AppError::new(
            ErrorCode::UnsupportedImageType,
            format!("unsupported image format {other:?}, accepted: {ACCEPTED_TYPES}"),
        )),
    }
}

pub fn user_prefix(user_id: Uuid) -> String {
    format!("{AVATAR_PREFIX}/{user_id}/")
}

pub fn avatar_key(user_id: Uuid, ext: &str) -> String {
    format!("{}{}.{ext}", user_prefix(user_id), Uuid::now_v7())
}

/// Reject keys outside the caller's own prefix or containing path tricks.
pub fn ensure_owned_key(user_id: Uuid, key: &str) -> Result<(), AppError> {
    let prefix = user_prefix(user_id);
    let Some(file) = key.strip_prefix(&prefix) else {
        return Err(AppError::forbidden("image key does not belong to the current user"));
    };
    if file.is_empty() || file.contains('/') || file.contains("..") {
        return Err(AppError::bad_request("malformed image key"));
    }
    extension_for(content_type_for_key(key).unwrap_or_default())?;
    Ok(())
}

fn content_type_for_key(key: &str) -> Option<&'static str> {
    let (_, ext) = key.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn is_external_url(image: &str) -> bool {
    image.starts_with("https://") || image.starts_with("http://")
}

/// Stored object key of `image`, if it refers to the object store at all.
pub fn stored_key(image: Option<&str>) -> Option<&str> {
    image.filter(|i| !i.is_empty() && !is_external_url(i))
}

/// Where a client should fetch the picture from: provider URLs pass through,
/// stored keys get a presigned GET, and users without a picture get the default.
pub async fn resolve_image_url(
    storage: &ObjectStorage,
    image: Option<&str>,
    default_avatar_url: &str,
    expires_secs: u64,
) -> Result<String, AppError> {
    match image.filter(|i| !i.is_empty()) {
        None => Ok(default_avatar_url.to_string()),
        Some(url) if is_external_url(url) => Ok(url.to_string()),
        Some(key) => storage
            .presigned_get(key, expires_secs)
            .await
            .map_err(|e| AppError::new(ErrorCode::ImageUploadFailed, e.to_string())),
    }
}

/// Best effort removal of a replaced picture.
pub async fn delete_previous(storage: &ObjectStorage, previous: Option<&str>, current_key: &str) {
    let Some(old_key) = stored_key(previous) else { return };
    if old_key == current_key {
        return;
    }
    if let Err(e) = storage.delete(old_key).await {
        tracing::warn!(key = %old_key, error = %e, "failed to delete previous profile image");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_shared::clients::storage::StorageSettings;

    fn storage() -> ObjectStorage {
        ObjectStorage::new(&StorageSettings {
            endpoint: "http://localhost:9000".into(),
            region: "auto".into(),
            access_key: "minioadmin".into(),
            secret_key: "minioadmin".into(),
            bucket: "atrium-avatars".into(),
        })
    }

    #[test]
    fn accepted_types_map_to_extensions() {
        assert_eq!(extension_for("image/jpeg").unwrap(), "jpg");
        assert_eq!(extension_for("IMAGE/PNG").unwrap(), "png");
        assert_eq!(extension_for("image/webp").unwrap(), "webp");
        assert_eq!(
            extension_for("image/svg+xml").unwrap_err().error_code(),
            ErrorCode::UnsupportedImageType
        );
    }

    #[test]
    fn keys_live_under_user_prefix() {
        let user = Uuid::now_v7();
        let key = avatar_key(user, "png");
        assert!(key.starts_with(&format!("avatars/{user}/")));
        assert!(key.ends_with(".png"));
        assert!(ensure_owned_key(user, &key).is_ok());
        assert_ne!(key, avatar_key(user, "png"));
    }

    #[test]
    fn foreign_keys_are_forbidden() {
        let owner = Uuid::now_v7();
        let key = avatar_key(owner, "jpg");
        let err = ensure_owned_key(Uuid::now_v7(), &key).unwrap_err();
        assert_eq!(err.error_code(), ErrorCode::Forbidden);
    }

    #[test]
    fn traversal_and_odd_extensions_are_rejected() {
        let user = Uuid::now_v7();
        let prefix = user_prefix(user);
        assert!(ensure_owned_key(user, &format!("{prefix}../x.png")).is_err());
        assert!(ensure_owned_key(user, &format!("{prefix}nested/x.png")).is_err());
        assert!(ensure_owned_key(user, &format!("{prefix}script.html")).is_err());
        assert!(ensure_owned_key(user, &prefix).is_err());
    }

    #[test]
    fn only_bare_keys_count_as_stored() {
        assert_eq!(stored_key(Some("avatars/u/a.png")), Some("avatars/u/a.png"));
        assert_eq!(stored_key(Some("https://avatars.githubusercontent.com/u/1")), None);
        assert_eq!(stored_key(Some("")), None);
        assert_eq!(stored_key(None), None);
    }

    #[tokio::test]
    async fn resolution_covers_all_sources() {
        let storage = storage();
        assert_eq!(
            resolve_image_url(&storage, None, "/default-avatar.svg", 60).await.unwrap(),
            "/default-avatar.svg"
        );
        let external = "https://lh3.googleusercontent.com/a/pic";
        assert_eq!(
            resolve_image_url(&storage, Some(external), "/d.svg", 60).await.unwrap(),
            external
        );
        let signed = resolve_image_url(&storage, Some("avatars/u/a.png"), "/d.svg", 60)
            .await
            .unwrap();
        assert!(signed.contains("/atrium-avatars/avatars/u/a.png?"));
        assert!(signed.contains("X-Amz-Signature="));
    }
}
