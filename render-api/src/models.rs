use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use render_shared::errors::AppResult;
use render_shared::types::auth::{ResolvedIdentity, UserRole};

use crate::domain::{AdminRequestStatus, FriendshipStatus, ImageStatus, MessageKind};
use crate::schema::{
    admin_requests, conversation_reads, conversations, enhancement_results, friendships, images,
    login_events, message_reactions, messages, notifications, users,
};

// --- User ---

#[derive(Debug, Queryable, Selectable, Identifiable, Clone)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub avatar_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Unknown role strings degrade to the least privileged role.
    pub fn role(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::User)
    }

    pub fn identity(&self) -> ResolvedIdentity {
        ResolvedIdentity {
            id: self.id,
            name: self.name.clone(),
            email: self.email.clone(),
            role: self.role(),
        }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: String,
}

/// Public view of a user. Never carries the password hash.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: UserRole,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Minimal user shape for lists and joins.
#[derive(Debug, Queryable, Selectable, Serialize, Clone, PartialEq)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(rename = "avatar_url")]
    pub avatar_path: Option<String>,
}

// --- Friendship ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = friendships)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Friendship {
    pub id: Uuid,
    pub requester_id: Uuid,
    pub addressee_id: Uuid,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Friendship {
    pub fn status(&self) -> AppResult<FriendshipStatus> {
        self.status.parse()
    }

    pub fn other_side(&self, user: Uuid) -> Uuid {
        if self.requester_id == user { self.addressee_id } else { self.requester_id }
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = friendships)]
pub struct NewFriendship {
    pub requester_id: Uuid,
    pub addressee_id: Uuid,
    pub status: String,
}

// --- Admin request ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = admin_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AdminRequest {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reason: String,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub reviewer_id: Option<Uuid>,
}

impl AdminRequest {
    pub fn status(&self) -> AppResult<AdminRequestStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = admin_requests)]
pub struct NewAdminRequest {
    pub user_id: Uuid,
    pub reason: String,
}

// --- Images ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = images)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Image {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub file_name: String,
    pub original_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: String,
    pub metadata: Option<serde_json::Value>,
    pub result_id: Option<Uuid>,
    pub source_image_id: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Image {
    pub fn status(&self) -> AppResult<ImageStatus> {
        self.status.parse()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = images)]
pub struct NewImage {
    pub owner_id: Uuid,
    pub file_name: String,
    pub original_path: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub source_image_id: Option<Uuid>,
}

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = enhancement_results)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct EnhancementResult {
    pub id: Uuid,
    pub image_id: Uuid,
    pub result_path: String,
    pub model: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = enhancement_results)]
pub struct NewEnhancementResult {
    pub image_id: Uuid,
    pub result_path: String,
    pub model: String,
    pub metadata: serde_json::Value,
}

// --- Chat ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Conversation {
    pub id: Uuid,
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn has_member(&self, user: Uuid) -> bool {
        self.user_a_id == user || self.user_b_id == user
    }

    pub fn peer_of(&self, user: Uuid) -> Uuid {
        crate::domain::peer_of(user, (self.user_a_id, self.user_b_id))
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation {
    pub user_a_id: Uuid,
    pub user_b_id: Uuid,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = conversation_reads)]
pub struct NewConversationRead {
    pub conversation_id: Uuid,
    pub user_id: Uuid,
}

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: String,
    pub file_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: String,
    pub file_url: Option<String>,
}

impl NewMessage {
    pub fn text(conversation_id: Uuid, sender_id: Uuid, content: &str) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: content.to_string(),
            kind: MessageKind::Text.as_str().to_string(),
            file_url: None,
        }
    }

    pub fn image(conversation_id: Uuid, sender_id: Uuid, file_url: String) -> Self {
        Self {
            conversation_id,
            sender_id,
            content: "Image".to_string(),
            kind: MessageKind::Image.as_str().to_string(),
            file_url: Some(file_url),
        }
    }
}

#[derive(Debug, Queryable, Selectable, Insertable, Serialize, Clone, PartialEq)]
#[diesel(table_name = message_reactions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Reaction {
    pub message_id: Uuid,
    pub user_id: Uuid,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

// --- Notifications ---

#[derive(Debug, Queryable, Selectable, Identifiable, Serialize, Clone)]
#[diesel(table_name = notifications)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: String,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = login_events)]
pub struct NewLoginEvent {
    pub user_id: Uuid,
    pub user_agent: Option<String>,
}
