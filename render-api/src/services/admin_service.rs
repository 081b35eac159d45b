use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use render_shared::errors::{on_unique_violation, AppError, AppResult, ErrorCode};
use render_shared::types::auth::UserRole;
use render_shared::types::{Paginated, PaginationParams};

use crate::domain::{promoted_role, validate_reason, AdminRequestStatus, FriendshipStatus};
use crate::models::{AdminRequest, Image, NewAdminRequest, User, UserProfile, UserSummary};
use crate::schema::{admin_requests, friendships, images, users};
use crate::services::{friend_service, notification_service, user_service};

#[derive(Debug, Serialize)]
pub struct PendingAdminRequest {
    pub id: Uuid,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct AdminDecision {
    pub request: AdminRequest,
    pub user_role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct DemotionOutcome {
    pub user_id: Uuid,
    pub role: UserRole,
    pub notified: bool,
}

#[derive(Debug, Serialize)]
pub struct UserOverview {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub friend_count: i64,
    pub image_count: i64,
}

#[derive(Debug, Serialize)]
pub struct UserDetails {
    #[serde(flatten)]
    pub overview: UserOverview,
    pub recent_images: Vec<Image>,
    pub recent_friends: Vec<UserSummary>,
}

const RECENT_LIMIT: usize = 5;

pub fn create_request(conn: &mut PgConnection, user: Uuid, role: UserRole, reason: &str) -> AppResult<AdminRequest> {
    let reason = validate_reason(reason)?;

    if role.is_admin() {
        return Err(AppError::new(ErrorCode::BadRequest, "you already have admin rights"));
    }

    let pending: bool = diesel::select(diesel::dsl::exists(
        admin_requests::table
            .filter(admin_requests::user_id.eq(user))
            .filter(admin_requests::status.eq(AdminRequestStatus::Pending.as_str())),
    ))
    .get_result(conn)?;

    if pending {
        return Err(AppError::new(ErrorCode::AdminRequestPending, "you already have a pending admin request"));
    }

    let request: AdminRequest = diesel::insert_into(admin_requests::table)
        .values(&NewAdminRequest { user_id: user, reason: reason.to_string() })
        .returning(AdminRequest::as_returning())
        .get_result(conn)
        .map_err(|e| {
            on_unique_violation(e, ErrorCode::AdminRequestPending, "you already have a pending admin request")
        })?;

    tracing::info!(request_id = %request.id, user_id = %user, "admin request created");
    Ok(request)
}

pub fn latest_request(conn: &mut PgConnection, user: Uuid) -> AppResult<Option<AdminRequest>> {
    let request = admin_requests::table
        .filter(admin_requests::user_id.eq(user))
        .order(admin_requests::requested_at.desc())
        .select(AdminRequest::as_select())
        .first(conn)
        .optional()?;
    Ok(request)
}

pub fn list_pending(conn: &mut PgConnection) -> AppResult<Vec<PendingAdminRequest>> {
    let rows: Vec<(AdminRequest, UserSummary)> = admin_requests::table
        .inner_join(users::table)
        .filter(admin_requests::status.eq(AdminRequestStatus::Pending.as_str()))
        .order(admin_requests::requested_at.desc())
        .select((AdminRequest::as_select(), UserSummary::as_select()))
        .load(conn)?;

    Ok(rows
        .into_iter()
        .map(|(request, user)| PendingAdminRequest {
            id: request.id,
            reason: request.reason,
            requested_at: request.requested_at,
            user,
        })
        .collect())
}

/// Approves or rejects a pending request. Approval promotes the requester in
/// the same transaction.
pub fn decide(conn: &mut PgConnection, request_id: Uuid, reviewer: Uuid, approve: bool) -> AppResult<AdminDecision> {
    let decision = conn.transaction(|conn| {
        let request = admin_requests::table
            .find(request_id)
            .select(AdminRequest::as_select())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::AdminRequestNotFound, "admin request not found"))?;

        if request.status()? != AdminRequestStatus::Pending {
            return Err(AppError::new(ErrorCode::AdminRequestDecided, "admin request was already decided"));
        }

        let status = if approve { AdminRequestStatus::Approved } else { AdminRequestStatus::Rejected };
        let request: AdminRequest = diesel::update(admin_requests::table.find(request_id))
            .set((
                admin_requests::status.eq(status.as_str()),
                admin_requests::reviewer_id.eq(reviewer),
                admin_requests::responded_at.eq(Utc::now()),
            ))
            .returning(AdminRequest::as_returning())
            .get_result(conn)?;

        let requester = user_service::find_user(conn, request.user_id)?;
        let mut role = requester.role();
        if approve {
            role = promoted_role(role);
            diesel::update(users::table.find(requester.id))
                .set(users::role.eq(role.as_str()))
                .execute(conn)?;
        }

        Ok::<_, AppError>(AdminDecision { request, user_role: role })
    })?;

    let (kind, message) = if approve {
        (notification_service::KIND_ADMIN_APPROVED, "Your admin request was approved")
    } else {
        (notification_service::KIND_ADMIN_REJECTED, "Your admin request was rejected")
    };
    notification_service::notify_best_effort(conn, decision.request.user_id, kind, message);

    tracing::info!(
        request_id = %request_id,
        reviewer = %reviewer,
        approved = approve,
        "admin request decided"
    );
    Ok(decision)
}

pub fn list_admins(conn: &mut PgConnection) -> AppResult<Vec<UserProfile>> {
    let admins = users::table
        .filter(users::role.eq_any([UserRole::Admin.as_str(), UserRole::Superadmin.as_str()]))
        .order(users::name.asc())
        .select(User::as_select())
        .load(conn)?;
    Ok(admins.iter().map(user_service::to_profile).collect())
}

fn missing_admin(err: AppError) -> AppError {
    match err.code() {
        ErrorCode::UserNotFound => AppError::new(ErrorCode::NotAnAdmin, "admin not found"),
        _ => err,
    }
}

/// Sets an admin back to `user`. The account whose email matches
/// `protected_email` can never be demoted.
pub fn demote(
    conn: &mut PgConnection,
    target: Uuid,
    actor: Uuid,
    protected_email: &str,
) -> AppResult<DemotionOutcome> {
    let user = user_service::find_user(conn, target).map_err(missing_admin)?;

    if !protected_email.is_empty() && user.email.eq_ignore_ascii_case(protected_email) {
        return Err(AppError::new(ErrorCode::ProtectedAccount, "this account cannot be demoted"));
    }

    let updated = diesel::update(
        users::table
            .find(target)
            .filter(users::role.eq_any([UserRole::Admin.as_str(), UserRole::Superadmin.as_str()])),
    )
    .set(users::role.eq(UserRole::User.as_str()))
    .execute(conn)?;

    if updated == 0 {
        return Err(AppError::new(ErrorCode::NotAnAdmin, "user is not an admin"));
    }

    let notified = notification_service::notify_best_effort(
        conn,
        target,
        notification_service::KIND_ADMIN_REVOKED,
        "Your admin rights have been revoked",
    );

    tracing::info!(target = %target, actor = %actor, notified, "admin demoted");
    Ok(DemotionOutcome { user_id: target, role: UserRole::User, notified })
}

fn friend_counts(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, i64>> {
    let accepted = FriendshipStatus::Accepted.as_str();
    let as_requester: Vec<(Uuid, i64)> = friendships::table
        .filter(friendships::status.eq(accepted))
        .filter(friendships::requester_id.eq_any(ids))
        .group_by(friendships::requester_id)
        .select((friendships::requester_id, count_star()))
        .load(conn)?;
    let as_addressee: Vec<(Uuid, i64)> = friendships::table
        .filter(friendships::status.eq(accepted))
        .filter(friendships::addressee_id.eq_any(ids))
        .group_by(friendships::addressee_id)
        .select((friendships::addressee_id, count_star()))
        .load(conn)?;

    let mut counts = HashMap::new();
    for (id, n) in as_requester.into_iter().chain(as_addressee) {
        *counts.entry(id).or_insert(0) += n;
    }
    Ok(counts)
}

fn image_counts(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> = images::table
        .filter(images::owner_id.eq_any(ids))
        .group_by(images::owner_id)
        .select((images::owner_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

pub fn list_users(conn: &mut PgConnection, params: &PaginationParams) -> AppResult<Paginated<UserOverview>> {
    let total: i64 = users::table.count().get_result(conn)?;
    let page = users::table
        .order((users::created_at.desc(), users::id.asc()))
        .limit(params.limit())
        .offset(params.offset())
        .select(User::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = page.iter().map(|u| u.id).collect();
    let friends = friend_counts(conn, &ids)?;
    let images = image_counts(conn, &ids)?;

    let items = page
        .iter()
        .map(|u| UserOverview {
            profile: user_service::to_profile(u),
            friend_count: friends.get(&u.id).copied().unwrap_or(0),
            image_count: images.get(&u.id).copied().unwrap_or(0),
        })
        .collect();

    Ok(Paginated::new(items, total, params))
}

pub fn user_details(conn: &mut PgConnection, user_id: Uuid) -> AppResult<UserDetails> {
    let user = user_service::find_user(conn, user_id)?;
    let ids = [user.id];
    let friend_count = friend_counts(conn, &ids)?.get(&user.id).copied().unwrap_or(0);
    let image_count = image_counts(conn, &ids)?.get(&user.id).copied().unwrap_or(0);

    let recent_images = images::table
        .filter(images::owner_id.eq(user.id))
        .order(images::uploaded_at.desc())
        .limit(RECENT_LIMIT as i64)
        .select(Image::as_select())
        .load(conn)?;

    let recent_friends = friend_service::list_friends(conn, user.id)?
        .into_iter()
        .take(RECENT_LIMIT)
        .map(|f| f.user)
        .collect();

    Ok(UserDetails {
        overview: UserOverview {
            profile: user_service::to_profile(&user),
            friend_count,
            image_count,
        },
        recent_images,
        recent_friends,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_user_reads_as_missing_admin() {
        let err = missing_admin(AppError::new(ErrorCode::UserNotFound, "user not found"));
        assert_eq!(err.code(), ErrorCode::NotAnAdmin);
    }

    #[test]
    fn store_failures_are_not_masked_as_missing_admin() {
        let err = missing_admin(AppError::new(ErrorCode::ServiceUnavailable, "database busy"));
        assert_eq!(err.code(), ErrorCode::ServiceUnavailable);
        let err = missing_admin(AppError::Database(diesel::result::Error::BrokenTransactionManager));
        assert_eq!(err.code(), ErrorCode::InternalError);
    }
}
