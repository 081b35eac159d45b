use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use render_shared::errors::{on_unique_violation, AppError, AppResult, ErrorCode};

use crate::domain::{relation_from_edge, FriendshipStatus, Relation};
use crate::models::{Friendship, NewFriendship, UserSummary};
use crate::schema::{friendships, users};
use crate::services::notification_service;

pub const DEFAULT_SEARCH_LIMIT: i64 = 10;
pub const MAX_SEARCH_LIMIT: i64 = 50;

/// How the caller names the user they want to befriend.
#[derive(Debug, Clone)]
pub enum FriendTarget {
    Id(Uuid),
    Name(String),
}

#[derive(Debug, Serialize)]
pub struct FriendEntry {
    pub friendship_id: Uuid,
    pub since: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub user: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct IncomingRequest {
    pub id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub requester: UserSummary,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    #[serde(flatten)]
    pub user: UserSummary,
    pub relation: Option<Relation>,
}

#[derive(Debug, Serialize)]
pub struct PendingEdge {
    pub id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub requester: UserSummary,
    pub addressee: UserSummary,
}

/// Edge between two users in either direction.
pub fn find_edge(conn: &mut PgConnection, a: Uuid, b: Uuid) -> AppResult<Option<Friendship>> {
    let edge = friendships::table
        .filter(
            friendships::requester_id.eq(a).and(friendships::addressee_id.eq(b))
                .or(friendships::requester_id.eq(b).and(friendships::addressee_id.eq(a))),
        )
        .select(Friendship::as_select())
        .first(conn)
        .optional()?;
    Ok(edge)
}

pub fn are_friends(conn: &mut PgConnection, a: Uuid, b: Uuid) -> AppResult<bool> {
    Ok(find_edge(conn, a, b)?
        .map(|e| e.status == FriendshipStatus::Accepted.as_str())
        .unwrap_or(false))
}

fn resolve_target(conn: &mut PgConnection, target: &FriendTarget) -> AppResult<UserSummary> {
    let found = match target {
        FriendTarget::Id(id) => users::table
            .find(*id)
            .select(UserSummary::as_select())
            .first(conn)
            .optional()?,
        FriendTarget::Name(name) => {
            let name = name.trim();
            if name.is_empty() {
                return Err(AppError::new(ErrorCode::ValidationError, "target name is required"));
            }
            users::table
                .filter(users::name.eq(name))
                .order(users::created_at.asc())
                .select(UserSummary::as_select())
                .first(conn)
                .optional()?
        }
    };
    found.ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))
}

pub fn send_request(conn: &mut PgConnection, requester: Uuid, target: &FriendTarget) -> AppResult<Friendship> {
    let target = resolve_target(conn, target)?;

    if target.id == requester {
        return Err(AppError::new(ErrorCode::CannotFriendSelf, "cannot send a friend request to yourself"));
    }

    if let Some(existing) = find_edge(conn, requester, target.id)? {
        let message = match existing.status()? {
            FriendshipStatus::Accepted => "you are already friends",
            FriendshipStatus::Pending => "a friend request already exists between you",
        };
        return Err(AppError::new(ErrorCode::FriendshipExists, message));
    }

    let edge: Friendship = diesel::insert_into(friendships::table)
        .values(&NewFriendship {
            requester_id: requester,
            addressee_id: target.id,
            status: FriendshipStatus::Pending.as_str().to_string(),
        })
        .returning(Friendship::as_returning())
        .get_result(conn)
        .map_err(|e| {
            on_unique_violation(e, ErrorCode::FriendshipExists, "a friend request already exists between you")
        })?;

    notification_service::notify_best_effort(
        conn,
        target.id,
        notification_service::KIND_FRIEND_REQUEST,
        "You have a new friend request",
    );

    tracing::info!(friendship_id = %edge.id, requester = %requester, addressee = %target.id, "friend request sent");
    Ok(edge)
}

/// Loads a pending edge addressed to `actor`. An edge addressed to someone
/// else is reported as missing.
fn pending_for_addressee(conn: &mut PgConnection, edge_id: Uuid, actor: Uuid) -> AppResult<Friendship> {
    let edge = friendships::table
        .find(edge_id)
        .select(Friendship::as_select())
        .for_update()
        .first(conn)
        .optional()?
        .filter(|e| e.addressee_id == actor)
        .ok_or_else(|| AppError::new(ErrorCode::FriendRequestNotFound, "friend request not found"))?;

    if edge.status()? != FriendshipStatus::Pending {
        return Err(AppError::new(ErrorCode::RequestNotPending, "friend request was already answered"));
    }
    Ok(edge)
}

pub fn accept_request(conn: &mut PgConnection, edge_id: Uuid, actor: Uuid) -> AppResult<Friendship> {
    let edge = conn.transaction(|conn| {
        pending_for_addressee(conn, edge_id, actor)?;
        diesel::update(friendships::table.find(edge_id))
            .set((
                friendships::status.eq(FriendshipStatus::Accepted.as_str()),
                friendships::responded_at.eq(Utc::now()),
            ))
            .returning(Friendship::as_returning())
            .get_result(conn)
            .map_err(AppError::from)
    })?;

    notification_service::notify_best_effort(
        conn,
        edge.requester_id,
        notification_service::KIND_FRIEND_ACCEPTED,
        "Your friend request was accepted",
    );

    tracing::info!(friendship_id = %edge_id, "friend request accepted");
    Ok(edge)
}

/// Rejection deletes the edge so that either side may ask again later.
pub fn reject_request(conn: &mut PgConnection, edge_id: Uuid, actor: Uuid) -> AppResult<Friendship> {
    let edge = conn.transaction(|conn| {
        let edge = pending_for_addressee(conn, edge_id, actor)?;
        diesel::delete(friendships::table.find(edge_id)).execute(conn)?;
        Ok::<_, AppError>(edge)
    })?;

    tracing::info!(friendship_id = %edge_id, "friend request rejected");
    Ok(edge)
}

/// Moderation override: admins can settle any pending edge.
pub fn force_decide(conn: &mut PgConnection, edge_id: Uuid, accept: bool) -> AppResult<Option<Friendship>> {
    conn.transaction(|conn| {
        let edge = friendships::table
            .find(edge_id)
            .select(Friendship::as_select())
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::new(ErrorCode::FriendRequestNotFound, "friend request not found"))?;
        if edge.status()? != FriendshipStatus::Pending {
            return Err(AppError::new(ErrorCode::RequestNotPending, "friend request was already answered"));
        }
        if accept {
            let updated = diesel::update(friendships::table.find(edge_id))
                .set((
                    friendships::status.eq(FriendshipStatus::Accepted.as_str()),
                    friendships::responded_at.eq(Utc::now()),
                ))
                .returning(Friendship::as_returning())
                .get_result(conn)?;
            Ok(Some(updated))
        } else {
            diesel::delete(friendships::table.find(edge_id)).execute(conn)?;
            Ok(None)
        }
    })
}

fn summaries_by_id(conn: &mut PgConnection, ids: &[Uuid]) -> AppResult<HashMap<Uuid, UserSummary>> {
    let rows = users::table
        .filter(users::id.eq_any(ids))
        .select(UserSummary::as_select())
        .load(conn)?;
    Ok(rows.into_iter().map(|u| (u.id, u)).collect())
}

/// Accepted friends in either direction, most recent friendship first.
pub fn list_friends(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<FriendEntry>> {
    let edges = friendships::table
        .filter(friendships::status.eq(FriendshipStatus::Accepted.as_str()))
        .filter(friendships::requester_id.eq(user_id).or(friendships::addressee_id.eq(user_id)))
        .order((friendships::responded_at.desc().nulls_last(), friendships::requested_at.desc()))
        .select(Friendship::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = edges.iter().map(|e| e.other_side(user_id)).collect();
    let mut people = summaries_by_id(conn, &ids)?;

    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            let user = people.remove(&edge.other_side(user_id))?;
            Some(FriendEntry {
                friendship_id: edge.id,
                since: edge.responded_at,
                user,
            })
        })
        .collect())
}

pub fn list_incoming(conn: &mut PgConnection, user_id: Uuid) -> AppResult<Vec<IncomingRequest>> {
    let edges = friendships::table
        .filter(friendships::addressee_id.eq(user_id))
        .filter(friendships::status.eq(FriendshipStatus::Pending.as_str()))
        .order(friendships::requested_at.desc())
        .select(Friendship::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = edges.iter().map(|e| e.requester_id).collect();
    let mut people = summaries_by_id(conn, &ids)?;

    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            Some(IncomingRequest {
                id: edge.id,
                requested_at: edge.requested_at,
                requester: people.remove(&edge.requester_id)?,
            })
        })
        .collect())
}

/// Every pending edge in the system, for the admin console.
pub fn list_all_pending(conn: &mut PgConnection) -> AppResult<Vec<PendingEdge>> {
    let edges = friendships::table
        .filter(friendships::status.eq(FriendshipStatus::Pending.as_str()))
        .order(friendships::requested_at.desc())
        .select(Friendship::as_select())
        .load(conn)?;

    let ids: Vec<Uuid> = edges
        .iter()
        .flat_map(|e| [e.requester_id, e.addressee_id])
        .collect();
    let people = summaries_by_id(conn, &ids)?;

    Ok(edges
        .into_iter()
        .filter_map(|edge| {
            Some(PendingEdge {
                id: edge.id,
                requested_at: edge.requested_at,
                requester: people.get(&edge.requester_id)?.clone(),
                addressee: people.get(&edge.addressee_id)?.clone(),
            })
        })
        .collect())
}

/// Escapes LIKE wildcards so user input matches literally.
fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn like_pattern(query: &str) -> String {
    format!("%{}%", escape_like(query))
}

fn prefix_pattern(query: &str) -> String {
    format!("{}%", escape_like(query))
}

/// Prefix matches on the name come first, then alphabetical.
fn rank_results(query: &str, results: &mut [UserSummary]) {
    let needle = query.to_lowercase();
    results.sort_by(|a, b| {
        let a_prefix = !a.name.to_lowercase().starts_with(&needle);
        let b_prefix = !b.name.to_lowercase().starts_with(&needle);
        a_prefix
            .cmp(&b_prefix)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
}

pub fn search(conn: &mut PgConnection, user_id: Uuid, query: &str, limit: Option<i64>) -> AppResult<Vec<SearchResult>> {
    let query = query.trim();
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);
    let pattern = like_pattern(query);

    let mut found = users::table
        .filter(users::id.ne(user_id))
        .filter(users::name.ilike(&pattern).or(users::email.ilike(&pattern)))
        .select(UserSummary::as_select())
        .order((users::name.ilike(prefix_pattern(query)).desc(), users::name.asc()))
        .limit(MAX_SEARCH_LIMIT * 2)
        .load(conn)?;

    rank_results(query, &mut found);
    found.truncate(limit as usize);

    let ids: Vec<Uuid> = found.iter().map(|u| u.id).collect();
    let edges = friendships::table
        .filter(
            friendships::requester_id.eq(user_id).and(friendships::addressee_id.eq_any(&ids))
                .or(friendships::addressee_id.eq(user_id).and(friendships::requester_id.eq_any(&ids))),
        )
        .select(Friendship::as_select())
        .load(conn)?;

    let mut relations = HashMap::new();
    for edge in edges {
        let status = edge.status()?;
        relations.insert(edge.other_side(user_id), relation_from_edge(user_id, edge.requester_id, status));
    }

    Ok(found
        .into_iter()
        .map(|user| SearchResult {
            relation: relations.get(&user.id).copied(),
            user,
        })
        .collect())
}
