use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use render_shared::clients::db::checkout;
use render_shared::clients::storage::StorageCategory;
use render_shared::errors::AppResult;
use render_shared::types::auth::AuthUser;
use render_shared::types::ApiResponse;

use crate::domain::validate_message_content;
use crate::events::{ChatEvent, ReactionChange};
use crate::models::{Conversation, NewMessage, UserSummary};
use crate::services::chat_service::{self, ConversationSummary, MessageView, ReactionView, ReadReceipt};
use crate::services::upload::read_file_field;
use crate::services::user_service;
use crate::AppState;

fn audience(conversation: &Conversation) -> [Uuid; 2] {
    [conversation.user_a_id, conversation.user_b_id]
}

// --- GET /chat/conversations ---

pub async fn list_conversations(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> AppResult<Json<ApiResponse<Vec<ConversationSummary>>>> {
    let mut conn = checkout(&state.db)?;
    let conversations = chat_service::list_conversations(&mut conn, user.id)?;
    Ok(Json(ApiResponse::ok(conversations)))
}

// --- GET /chat/conversation/:friend_id ---

#[derive(Debug, Serialize)]
pub struct OpenedConversation {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub peer: UserSummary,
}

pub async fn get_or_create_conversation(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(friend_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OpenedConversation>>> {
    let mut conn = checkout(&state.db)?;
    let conversation = chat_service::get_or_create(&mut conn, user.id, friend_id)?;
    let peer = user_service::find_summary(&mut conn, conversation.peer_of(user.id))?;
    Ok(Json(ApiResponse::ok(OpenedConversation { conversation, peer })))
}

// --- GET /chat/messages/:conversation_id ---

pub async fn list_messages(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Vec<MessageView>>>> {
    let mut conn = checkout(&state.db)?;
    let messages = chat_service::list_messages(&mut conn, conversation_id, user.id)?;
    Ok(Json(ApiResponse::ok(messages)))
}

// --- POST /chat/messages/:conversation_id ---

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub content: String,
}

pub async fn send_message(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<MessageView>>)> {
    let content = validate_message_content(&req.content)?;

    let mut conn = checkout(&state.db)?;
    let conversation = chat_service::member_conversation(&mut conn, conversation_id, user.id)?;
    let message = chat_service::post_message(
        &mut conn,
        &conversation,
        NewMessage::text(conversation.id, user.id, content),
    )?;

    state.events.emit(ChatEvent::message_created(audience(&conversation), message.clone()));
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

// --- POST /chat/messages/:conversation_id/image ---

pub async fn send_image(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<ApiResponse<MessageView>>)> {
    // Membership is checked before anything lands on disk.
    let conversation = {
        let mut conn = checkout(&state.db)?;
        chat_service::member_conversation(&mut conn, conversation_id, user.id)?
    };

    let file = read_file_field(&mut multipart, "image", &state.chat_policy()).await?;
    let stored = state
        .storage
        .save(StorageCategory::Chat, &file.extension, &file.bytes)
        .await?;

    let posted = {
        let mut conn = checkout(&state.db)?;
        chat_service::post_message(
            &mut conn,
            &conversation,
            NewMessage::image(conversation.id, user.id, stored.public_url.clone()),
        )
    };

    let message = match posted {
        Ok(message) => message,
        Err(e) => {
            state.storage.delete_best_effort(&stored.public_url).await;
            return Err(e);
        }
    };

    state.events.emit(ChatEvent::message_created(audience(&conversation), message.clone()));
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(message))))
}

// --- PUT /chat/messages/:conversation_id/read ---

pub async fn mark_read(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ReadReceipt>>> {
    let mut conn = checkout(&state.db)?;
    let conversation = chat_service::member_conversation(&mut conn, conversation_id, user.id)?;
    let receipt = chat_service::mark_read(&mut conn, conversation_id, user.id)?;

    // Repeated calls that change nothing stay quiet on the stream.
    if receipt.marked > 0 {
        state.events.emit(ChatEvent::messages_read(audience(&conversation), receipt.clone()));
    }
    Ok(Json(ApiResponse::ok(receipt)))
}

// --- POST /chat/reactions/:message_id ---

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    #[serde(default, alias = "reaction")]
    pub emoji: String,
}

pub async fn add_reaction(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
    Json(req): Json<ReactRequest>,
) -> AppResult<Json<ApiResponse<ReactionView>>> {
    let mut conn = checkout(&state.db)?;
    let (message, reaction) = chat_service::react(&mut conn, message_id, user.id, &req.emoji)?;
    let conversation = chat_service::member_conversation(&mut conn, message.conversation_id, user.id)?;

    let view = ReactionView::from(reaction);
    state.events.emit(ChatEvent::reaction_updated(
        audience(&conversation),
        conversation.id,
        ReactionChange { message_id, user_id: user.id, reaction: Some(view.clone()) },
    ));
    Ok(Json(ApiResponse::ok(view)))
}

// --- DELETE /chat/reactions/:message_id ---

#[derive(Debug, Serialize)]
pub struct ReactionRemoved {
    pub message_id: Uuid,
    pub removed: bool,
}

pub async fn remove_reaction(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<ReactionRemoved>>> {
    let mut conn = checkout(&state.db)?;
    let (message, removed) = chat_service::unreact(&mut conn, message_id, user.id)?;

    if removed {
        let conversation = chat_service::member_conversation(&mut conn, message.conversation_id, user.id)?;
        state.events.emit(ChatEvent::reaction_updated(
            audience(&conversation),
            conversation.id,
            ReactionChange { message_id, user_id: user.id, reaction: None },
        ));
    }
    Ok(Json(ApiResponse::ok(ReactionRemoved { message_id, removed })))
}
