use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use render_shared::clients::db::checkout;
use render_shared::errors::{AppError, AppResult, ErrorCode};
use render_shared::types::auth::AuthToken;
use render_shared::types::ApiResponse;

use crate::models::UserProfile;
use crate::services::{auth_service, token_service, user_service};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AuthSession {
    #[serde(flatten)]
    pub token: AuthToken,
    pub user: UserProfile,
}

// --- POST /auth/register ---

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 100, message = "name must be 1 to 100 characters"))]
    pub name: String,
    #[validate(email(message = "invalid email format"))]
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<AuthSession>>)> {
    req.validate()
        .map_err(|e| AppError::new(ErrorCode::ValidationError, e.to_string()))?;
    if req.name.trim().is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "name is required"));
    }
    auth_service::validate_password(&req.password)?;

    let mut conn = checkout(&state.db)?;
    let user = auth_service::register_user(&mut conn, &req.name, &req.email, &req.password)?;
    let token = token_service::issue_token(&user, &state.config.jwt_secret, state.config.jwt_ttl_secs)?;

    let session = AuthSession { token, user: user_service::to_profile(&user) };
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(session, "user registered")),
    ))
}

// --- POST /auth/login ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<ApiResponse<AuthSession>>> {
    if req.email.trim().is_empty() || req.password.is_empty() {
        return Err(AppError::new(ErrorCode::ValidationError, "email and password are required"));
    }

    let mut conn = checkout(&state.db)?;
    let user = auth_service::authenticate(&mut conn, &req.email, &req.password)?;

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.chars().take(512).collect::<String>());
    // Audit rows are informational; a failed insert must not block the login.
    if let Err(e) = auth_service::record_login(&mut conn, user.id, user_agent) {
        tracing::warn!(user_id = %user.id, error = %e, "failed to record login event");
    }

    let token = token_service::issue_token(&user, &state.config.jwt_secret, state.config.jwt_ttl_secs)?;
    tracing::info!(user_id = %user.id, "user logged in");

    Ok(Json(ApiResponse::ok(AuthSession { token, user: user_service::to_profile(&user) })))
}
