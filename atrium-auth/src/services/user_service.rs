use diesel::prelude::*;
use diesel::PgConnection;
use uuid::Uuid;

use atrium_shared::errors::{AppError, ErrorCode};

use crate::models::User;
use crate::schema::users;

pub fn find_by_id(conn: &mut PgConnection, user_id: Uuid) -> Result<User, AppError> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
}

/// Lookup by an already normalized email.
pub fn find_by_email(conn: &mut PgConnection, email: &str) -> Result<Option<User>, AppError> {
    let user = users::table
        .filter(users::email.eq(email))
        .select(User::as_select())
        .first(conn)
        .optional()?;
    Ok(user)
}

pub fn set_image(conn: &mut PgConnection, user_id: Uuid, image: &str) -> Result<(), AppError> {
    diesel::update(users::table.find(user_id))
        .set((
            users::image.eq(Some(image.to_string())),
            users::updated_at.eq(chrono::Utc::now()),
        ))
        .execute(conn)?;
    Ok(())
}
