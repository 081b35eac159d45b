use axum::extract::{Multipart, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use render_shared::clients::db::checkout;
use render_shared::clients::storage::StorageCategory;
use render_shared::errors::{AppError, AppResult, ErrorCode};
use render_shared::types::auth::AuthUser;
use render_shared::types::{ApiResponse, Paginated, PaginationParams};

use crate::models::{AdminRequest, Notification, UserProfile};
use crate::services::upload::read_file_field;
use crate::services::{admin_service, notification_service, user_service};
use crate::AppState;

// --- GET /user/profile ---

pub async fn get_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let mut conn = checkout(&state.db)?;
    let found = user_service::find_user(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(user_service::to_profile(&found))))
}

// --- PUT /user/profile ---

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1 to 100 characters"))]
    pub name: Option<String>,
    #[validate(email(message = "invalid email format"))]
    pub email: Option<String>,
}

pub async fn update_profile(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateProfileRequest>,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;

    let mut conn = checkout(&state.db)?;
    let updated = user_service::update_profile(
        &mut conn,
        user.id,
        user_service::ProfileChanges { name: req.name, email: req.email },
    )?;
    Ok(Json(ApiResponse::ok_with_message(user_service::to_profile(&updated), "profile updated")))
}

// --- POST /user/profile/photo ---

pub async fn upload_photo(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> AppResult<Json<ApiResponse<UserProfile>>> {
    let file = read_file_field(&mut multipart, "photo", &state.avatar_policy()).await?;
    let stored = state
        .storage
        .save(StorageCategory::Profile, &file.extension, &file.bytes)
        .await?;

    let previous = {
        let mut conn = checkout(&state.db)?;
        match user_service::set_avatar(&mut conn, user.id, &stored.public_url) {
            Ok(previous) => previous,
            Err(e) => {
                state.storage.delete_best_effort(&stored.public_url).await;
                return Err(e);
            }
        }
    };

    if let Some(old) = previous {
        state.storage.delete_best_effort(&old).await;
    }

    let mut conn = checkout(&state.db)?;
    let updated = user_service::find_user(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok_with_message(user_service::to_profile(&updated), "photo updated")))
}

// --- GET /user/notifications ---

pub async fn list_notifications(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> AppResult<Json<ApiResponse<Paginated<Notification>>>> {
    let mut conn = checkout(&state.db)?;
    let page = notification_service::list_for_user(&mut conn, user.id, &params)?;
    Ok(Json(ApiResponse::ok(page)))
}

// --- PUT /user/notifications/read ---

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: usize,
}

pub async fn mark_notifications_read(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<MarkedRead>>> {
    let mut conn = checkout(&state.db)?;
    let updated = notification_service::mark_all_read(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(MarkedRead { updated })))
}

// --- GET /user/admin-request ---

pub async fn get_admin_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Option<AdminRequest>>>> {
    let mut conn = checkout(&state.db)?;
    let latest = admin_service::latest_request(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(latest)))
}

// --- POST /user/admin-request ---

#[derive(Debug, Deserialize)]
pub struct CreateAdminRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn create_admin_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAdminRequest>,
) -> AppResult<Json<ApiResponse<AdminRequest>>> {
    let mut conn = checkout(&state.db)?;
    let request = admin_service::create_request(&mut conn, user.id, user.role, &req.reason)?;
    Ok(Json(ApiResponse::ok_with_message(request, "admin request submitted")))
}
