use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use render_shared::errors::{on_unique_violation, AppError, AppResult, ErrorCode};
use render_shared::types::auth::ResolvedIdentity;

use crate::models::{User, UserProfile, UserSummary};
use crate::schema::users;
use crate::services::auth_service::normalize_email;

pub fn to_profile(user: &User) -> UserProfile {
    UserProfile {
        id: user.id,
        name: user.name.clone(),
        email: user.email.clone(),
        role: user.role(),
        avatar_url: user.avatar_path.clone(),
        created_at: user.created_at,
    }
}

pub fn find_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
}

pub fn find_summary(conn: &mut PgConnection, user_id: Uuid) -> AppResult<UserSummary> {
    users::table
        .find(user_id)
        .select(UserSummary::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
}

/// Current identity of a token subject, or `None` if the account is gone.
pub fn resolve_identity(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Option<ResolvedIdentity>> {
    let user = users::table
        .find(user_id)
        .select(User::as_select())
        .first(conn)
        .optional()?;
    Ok(user.map(|u| u.identity()))
}

#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub fn update_profile(conn: &mut PgConnection, user_id: Uuid, changes: ProfileChanges) -> AppResult<User> {
    let name = changes.name.map(|n| n.trim().to_string());
    if matches!(&name, Some(n) if n.is_empty()) {
        return Err(AppError::new(ErrorCode::ValidationError, "name cannot be empty"));
    }
    let email = changes.email.map(|e| normalize_email(&e));

    if name.is_none() && email.is_none() {
        return find_user(conn, user_id);
    }

    if let Some(ref email) = email {
        let taken: bool = diesel::select(diesel::dsl::exists(
            users::table
                .filter(users::email.eq(email))
                .filter(users::id.ne(user_id)),
        ))
        .get_result(conn)?;
        if taken {
            return Err(AppError::new(ErrorCode::EmailAlreadyExists, "email already registered"));
        }
    }

    let user = diesel::update(users::table.find(user_id))
        .set((
            name.map(|n| users::name.eq(n)),
            email.map(|e| users::email.eq(e)),
        ))
        .returning(User::as_returning())
        .get_result(conn)
        .optional()
        .map_err(|e| on_unique_violation(e, ErrorCode::EmailAlreadyExists, "email already registered"))?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;

    tracing::info!(user_id = %user_id, "profile updated");
    Ok(user)
}

/// Points the avatar at a new file and returns the previous one, if any, so
/// the caller can remove it.
pub fn set_avatar(conn: &mut PgConnection, user_id: Uuid, avatar_url: &str) -> AppResult<Option<String>> {
    conn.transaction(|conn| {
        let previous: Option<String> = users::table
            .find(user_id)
            .select(users::avatar_path)
            .for_update()
            .first::<Option<String>>(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?;

        diesel::update(users::table.find(user_id))
            .set(users::avatar_path.eq(avatar_url))
            .execute(conn)?;

        Ok(previous)
    })
}
