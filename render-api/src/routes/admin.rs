use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use render_shared::clients::db::checkout;
use render_shared::errors::AppResult;
use render_shared::middleware::AdminUser;
use render_shared::types::{ApiResponse, Paginated, PaginationParams};

use crate::models::UserProfile;
use crate::services::admin_service::{
    self, AdminDecision, DemotionOutcome, PendingAdminRequest, UserDetails, UserOverview,
};
use crate::services::friend_service::{self, PendingEdge};
use crate::AppState;

// --- GET /admin/pending ---

pub async fn list_pending_requests(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<PendingAdminRequest>>>> {
    let mut conn = checkout(&state.db)?;
    let pending = admin_service::list_pending(&mut conn)?;
    Ok(Json(ApiResponse::ok(pending)))
}

// --- PUT /admin/handle ---

#[derive(Debug, Deserialize)]
pub struct HandleRequestBody {
    #[serde(alias = "requestId")]
    pub request_id: Uuid,
    pub approve: bool,
}

pub async fn handle_request(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<HandleRequestBody>,
) -> AppResult<Json<ApiResponse<AdminDecision>>> {
    let mut conn = checkout(&state.db)?;
    let decision = admin_service::decide(&mut conn, body.request_id, admin.id, body.approve)?;
    let message = if body.approve { "admin request approved" } else { "admin request rejected" };
    Ok(Json(ApiResponse::ok_with_message(decision, message)))
}

// --- GET /admin/list ---

pub async fn list_admins(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<UserProfile>>>> {
    let mut conn = checkout(&state.db)?;
    let admins = admin_service::list_admins(&mut conn)?;
    Ok(Json(ApiResponse::ok(admins)))
}

// --- DELETE /admin/remove/:user_id ---

pub async fn remove_admin(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<DemotionOutcome>>> {
    let mut conn = checkout(&state.db)?;
    let outcome = admin_service::demote(&mut conn, user_id, admin.id, &state.config.superadmin_email)?;
    Ok(Json(ApiResponse::ok_with_message(outcome, "admin rights removed")))
}

// --- GET /admin/users ---

pub async fn list_users(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<UserOverview>>>> {
    let mut conn = checkout(&state.db)?;
    let page = admin_service::list_users(&mut conn, &params)?;
    Ok(Json(ApiResponse::ok(page)))
}

// --- GET /admin/users/:user_id ---

pub async fn user_details(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<UserDetails>>> {
    let mut conn = checkout(&state.db)?;
    let details = admin_service::user_details(&mut conn, user_id)?;
    Ok(Json(ApiResponse::ok(details)))
}

// --- GET /admin/friend-requests ---

pub async fn list_friend_requests(
    _admin: AdminUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<PendingEdge>>>> {
    let mut conn = checkout(&state.db)?;
    let pending = friend_service::list_all_pending(&mut conn)?;
    Ok(Json(ApiResponse::ok(pending)))
}

// --- POST /admin/friend-requests/:id/accept|reject ---

#[derive(Debug, Serialize)]
pub struct ForcedDecision {
    pub id: Uuid,
    pub status: &'static str,
}

pub async fn accept_friend_request(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ForcedDecision>>> {
    let mut conn = checkout(&state.db)?;
    friend_service::force_decide(&mut conn, edge_id, true)?;
    tracing::info!(friendship_id = %edge_id, admin = %admin.id, "friend request accepted by admin");
    Ok(Json(ApiResponse::ok(ForcedDecision { id: edge_id, status: "accepted" })))
}

pub async fn reject_friend_request(
    AdminUser(admin): AdminUser,
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ForcedDecision>>> {
    let mut conn = checkout(&state.db)?;
    friend_service::force_decide(&mut conn, edge_id, false)?;
    tracing::info!(friendship_id = %edge_id, admin = %admin.id, "friend request rejected by admin");
    Ok(Json(ApiResponse::ok(ForcedDecision { id: edge_id, status: "rejected" })))
}
