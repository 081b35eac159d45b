use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use render_shared::errors::{AppError, AppResult, ErrorCode};
use render_shared::types::{Paginated, PaginationParams};

use crate::models::{NewNotification, Notification};
use crate::schema::notifications;

pub const KIND_ADMIN_APPROVED: &str = "admin_request_approved";
pub const KIND_ADMIN_REJECTED: &str = "admin_request_rejected";
pub const KIND_ADMIN_REVOKED: &str = "admin_revoked";
pub const KIND_FRIEND_REQUEST: &str = "friend_request";
pub const KIND_FRIEND_ACCEPTED: &str = "friend_accepted";

pub fn create_notification(
    conn: &mut PgConnection,
    user_id: Uuid,
    kind: &str,
    message: &str,
) -> AppResult<Notification> {
    diesel::insert_into(notifications::table)
        .values(&NewNotification {
            user_id,
            kind: kind.to_string(),
            message: message.to_string(),
        })
        .returning(Notification::as_returning())
        .get_result(conn)
        .map_err(|e| {
            AppError::with_details(
                ErrorCode::NotificationFailed,
                "failed to store notification",
                serde_json::json!({ "cause": e.to_string() }),
            )
        })
}

/// Side-effect notification: a failure is logged and never propagated.
/// Runs in a savepoint so a failed insert cannot poison an enclosing
/// transaction.
pub fn notify_best_effort(conn: &mut PgConnection, user_id: Uuid, kind: &str, message: &str) -> bool {
    let outcome = conn.transaction(|conn| create_notification(conn, user_id, kind, message));
    match outcome {
        Ok(_) => true,
        Err(e) => {
            tracing::warn!(user_id = %user_id, kind, error = ?e, "notification not delivered");
            false
        }
    }
}

pub fn list_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    params: &PaginationParams,
) -> AppResult<Paginated<Notification>> {
    let total: i64 = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .count()
        .get_result(conn)?;

    let items = notifications::table
        .filter(notifications::user_id.eq(user_id))
        .order((notifications::created_at.desc(), notifications::id.desc()))
        .limit(params.limit())
        .offset(params.offset())
        .select(Notification::as_select())
        .load(conn)?;

    Ok(Paginated::new(items, total, params))
}

pub fn mark_all_read(conn: &mut PgConnection, user_id: Uuid) -> AppResult<usize> {
    let updated = diesel::update(
        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .filter(notifications::is_read.eq(false)),
    )
    .set(notifications::is_read.eq(true))
    .execute(conn)?;
    Ok(updated)
}
