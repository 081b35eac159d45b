use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use render_shared::clients::db::checkout;
use render_shared::errors::{AppError, AppResult, ErrorCode};
use render_shared::types::auth::AuthUser;
use render_shared::types::ApiResponse;

use crate::models::Friendship;
use crate::services::friend_service::{self, FriendEntry, FriendTarget, IncomingRequest, SearchResult};
use crate::AppState;

/// Reported after a rejection. The edge row is gone by then, so this is
/// all that is left of it.
#[derive(Debug, Serialize)]
pub struct FriendshipOutcome {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub addressee_id: Uuid,
    pub status: &'static str,
}

impl FriendshipOutcome {
    pub fn rejected(edge: &Friendship) -> Self {
        Self {
            id: edge.id,
            requester_id: edge.requester_id,
            addressee_id: edge.addressee_id,
            status: "rejected",
        }
    }
}

// --- GET /friends ---

pub async fn list_friends(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<FriendEntry>>>> {
    let mut conn = checkout(&state.db)?;
    let friends = friend_service::list_friends(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(friends)))
}

// --- GET /friends/search?query= ---

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default, alias = "q")]
    pub query: String,
    pub limit: Option<i64>,
}

pub async fn search_users(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(q): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<Vec<SearchResult>>>> {
    let mut conn = checkout(&state.db)?;
    let results = friend_service::search(&mut conn, user.id, &q.query, q.limit)?;
    Ok(Json(ApiResponse::ok(results)))
}

// --- GET /friends/requests ---

pub async fn list_requests(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<IncomingRequest>>>> {
    let mut conn = checkout(&state.db)?;
    let pending = friend_service::list_incoming(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(pending)))
}

// --- POST /friends/request ---

/// The target is named either by id or by exact display name.
#[derive(Debug, Deserialize)]
pub struct SendRequestBody {
    #[serde(alias = "friendId", alias = "friend_id")]
    pub user_id: Option<Uuid>,
    #[serde(alias = "friendName", alias = "friend_name")]
    pub name: Option<String>,
}

impl SendRequestBody {
    fn target(self) -> AppResult<FriendTarget> {
        match (self.user_id, self.name) {
            (Some(id), _) => Ok(FriendTarget::Id(id)),
            (None, Some(name)) if !name.trim().is_empty() => Ok(FriendTarget::Name(name.trim().to_string())),
            _ => Err(AppError::new(ErrorCode::ValidationError, "a user id or name is required")),
        }
    }
}

pub async fn send_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendRequestBody>,
) -> AppResult<(StatusCode, Json<ApiResponse<Friendship>>)> {
    let target = body.target()?;
    let mut conn = checkout(&state.db)?;
    let edge = friend_service::send_request(&mut conn, user.id, &target)?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::ok_with_message(edge, "friend request sent")),
    ))
}

// --- POST /friends/accept/:id ---

pub async fn accept_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Friendship>>> {
    let mut conn = checkout(&state.db)?;
    let edge = friend_service::accept_request(&mut conn, edge_id, user.id)?;
    Ok(Json(ApiResponse::ok_with_message(edge, "friend request accepted")))
}

// --- POST /friends/reject/:id ---

pub async fn reject_request(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<FriendshipOutcome>>> {
    let mut conn = checkout(&state.db)?;
    let edge = friend_service::reject_request(&mut conn, edge_id, user.id)?;
    Ok(Json(ApiResponse::ok_with_message(
        FriendshipOutcome::rejected(&edge),
        "friend request rejected",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_prefers_id_over_name() {
        let id = Uuid::new_v4();
        let body: SendRequestBody =
            serde_json::from_value(serde_json::json!({ "friendId": id, "friendName": "bob" })).unwrap();
        assert!(matches!(body.target().unwrap(), FriendTarget::Id(found) if found == id));
    }

    #[test]
    fn request_body_accepts_name() {
        let body: SendRequestBody = serde_json::from_value(serde_json::json!({ "name": "  bob " })).unwrap();
        assert!(matches!(body.target().unwrap(), FriendTarget::Name(n) if n == "bob"));
    }

    #[test]
    fn request_body_requires_a_target() {
        let body: SendRequestBody = serde_json::from_value(serde_json::json!({ "name": "  " })).unwrap();
        assert_eq!(body.target().unwrap_err().code(), ErrorCode::ValidationError);
    }
}
