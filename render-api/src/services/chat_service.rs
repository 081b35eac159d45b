use chrono::{DateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use render_shared::errors::{AppError, AppResult, ErrorCode};

use crate::domain::{canonical_pair, validate_emoji};
use crate::models::{Conversation, Message, NewConversation, NewConversationRead, NewMessage, Reaction, UserSummary};
use crate::schema::{conversation_reads, conversations, message_reactions, messages, users};
use crate::services::friend_service;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ReactionView {
    pub user_id: Uuid,
    pub emoji: String,
    pub reacted_at: DateTime<Utc>,
}

impl From<Reaction> for ReactionView {
    fn from(r: Reaction) -> Self {
        Self { user_id: r.user_id, emoji: r.emoji, reacted_at: r.reacted_at }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
    pub content: String,
    pub kind: String,
    pub file_url: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub is_read: bool,
    pub reactions: Vec<ReactionView>,
}

impl MessageView {
    fn new(message: Message, sender: &UserSummary, reactions: Vec<ReactionView>) -> Self {
        Self {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            sender_name: sender.name.clone(),
            sender_avatar: sender.avatar_path.clone(),
            content: message.content,
            kind: message.kind,
            file_url: message.file_url,
            sent_at: message.sent_at,
            is_read: message.is_read,
            reactions,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LastMessage {
    pub content: String,
    pub kind: String,
    pub sent_at: DateTime<Utc>,
    pub is_own: bool,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: Uuid,
    pub peer: UserSummary,
    pub last_message: Option<LastMessage>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub unread_count: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct ReadReceipt {
    pub conversation_id: Uuid,
    pub reader_id: Uuid,
    pub marked: usize,
    pub last_read_at: DateTime<Utc>,
}

fn find_conversation(conn: &mut PgConnection, conversation_id: Uuid) -> AppResult<Conversation> {
    conversations::table
        .find(conversation_id)
        .select(Conversation::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::ConversationNotFound, "conversation not found"))
}

/// Loads a conversation the user takes part in.
pub fn member_conversation(conn: &mut PgConnection, conversation_id: Uuid, user: Uuid) -> AppResult<Conversation> {
    let conversation = find_conversation(conn, conversation_id)?;
    if !conversation.has_member(user) {
        return Err(AppError::new(ErrorCode::NotConversationMember, "you are not part of this conversation"));
    }
    Ok(conversation)
}

fn find_pair(conn: &mut PgConnection, pair: (Uuid, Uuid)) -> AppResult<Option<Conversation>> {
    let found = conversations::table
        .filter(conversations::user_a_id.eq(pair.0))
        .filter(conversations::user_b_id.eq(pair.1))
        .select(Conversation::as_select())
        .first(conn)
        .optional()?;
    Ok(found)
}

/// Returns the single conversation of two accepted friends, creating it and
/// its read-state rows on first contact.
pub fn get_or_create(conn: &mut PgConnection, user: Uuid, friend: Uuid) -> AppResult<Conversation> {
    if user == friend || !friend_service::are_friends(conn, user, friend)? {
        return Err(AppError::new(ErrorCode::NotFriends, "you can only chat with friends"));
    }

    let pair = canonical_pair(user, friend);
    if let Some(existing) = find_pair(conn, pair)? {
        return Ok(existing);
    }

    let created = conn.transaction(|conn| {
        let conversation: Conversation = diesel::insert_into(conversations::table)
            .values(&NewConversation { user_a_id: pair.0, user_b_id: pair.1 })
            .returning(Conversation::as_returning())
            .get_result(conn)?;

        diesel::insert_into(conversation_reads::table)
            .values(&vec![
                NewConversationRead { conversation_id: conversation.id, user_id: pair.0 },
                NewConversationRead { conversation_id: conversation.id, user_id: pair.1 },
            ])
            .execute(conn)?;

        Ok::<_, AppError>(conversation)
    });

    match created {
        Ok(conversation) => {
            tracing::info!(conversation_id = %conversation.id, "conversation created");
            Ok(conversation)
        }
        // Lost a race with the other participant: theirs is the conversation.
        Err(e) if e.is_unique_violation() => find_pair(conn, pair)?
            .ok_or_else(|| AppError::internal("conversation vanished after unique violation")),
        Err(e) => Err(e),
    }
}

fn reactions_for(conn: &mut PgConnection, message_ids: &[Uuid]) -> AppResult<HashMap<Uuid, Vec<ReactionView>>> {
    let rows = message_reactions::table
        .filter(message_reactions::message_id.eq_any(message_ids))
        .order(message_reactions::reacted_at.asc())
        .select(Reaction::as_select())
        .load(conn)?;

    let mut grouped: HashMap<Uuid, Vec<ReactionView>> = HashMap::new();
    for r in rows {
        grouped.entry(r.message_id).or_default().push(r.into());
    }
    Ok(grouped)
}

/// Full history in send order, oldest first.
pub fn list_messages(conn: &mut PgConnection, conversation_id: Uuid, user: Uuid) -> AppResult<Vec<MessageView>> {
    member_conversation(conn, conversation_id, user)?;

    let rows: Vec<(Message, UserSummary)> = messages::table
        .inner_join(users::table)
        .filter(messages::conversation_id.eq(conversation_id))
        .order((messages::sent_at.asc(), messages::id.asc()))
        .select((Message::as_select(), UserSummary::as_select()))
        .load(conn)?;

    let ids: Vec<Uuid> = rows.iter().map(|(m, _)| m.id).collect();
    let mut reactions = reactions_for(conn, &ids)?;

    Ok(rows
        .into_iter()
        .map(|(message, sender)| {
            let r = reactions.remove(&message.id).unwrap_or_default();
            MessageView::new(message, &sender, r)
        })
        .collect())
}

/// Appends a message to a conversation the sender belongs to. Content must
/// already be validated.
pub fn post_message(conn: &mut PgConnection, conversation: &Conversation, new_message: NewMessage) -> AppResult<MessageView> {
    if !conversation.has_member(new_message.sender_id) {
        return Err(AppError::new(ErrorCode::NotConversationMember, "you are not part of this conversation"));
    }

    let (message, sender) = conn.transaction(|conn| {
        let message: Message = diesel::insert_into(messages::table)
            .values(&new_message)
            .returning(Message::as_returning())
            .get_result(conn)?;

        diesel::update(conversations::table.find(conversation.id))
            .set(conversations::last_message_at.eq(message.sent_at))
            .execute(conn)?;

        let sender: UserSummary = users::table
            .find(message.sender_id)
            .select(UserSummary::as_select())
            .first(conn)?;

        Ok::<_, AppError>((message, sender))
    })?;

    tracing::debug!(message_id = %message.id, conversation_id = %conversation.id, kind = %message.kind, "message sent");
    Ok(MessageView::new(message, &sender, Vec::new()))
}

/// Marks every message from the peer as read. Safe to repeat.
pub fn mark_read(conn: &mut PgConnection, conversation_id: Uuid, reader: Uuid) -> AppResult<ReadReceipt> {
    member_conversation(conn, conversation_id, reader)?;
    let now = Utc::now();

    let marked = conn.transaction(|conn| {
        let marked = diesel::update(
            messages::table
                .filter(messages::conversation_id.eq(conversation_id))
                .filter(messages::sender_id.ne(reader))
                .filter(messages::is_read.eq(false)),
        )
        .set(messages::is_read.eq(true))
        .execute(conn)?;

        diesel::insert_into(conversation_reads::table)
            .values((
                conversation_reads::conversation_id.eq(conversation_id),
                conversation_reads::user_id.eq(reader),
                conversation_reads::last_read_at.eq(now),
            ))
            .on_conflict((conversation_reads::conversation_id, conversation_reads::user_id))
            .do_update()
            .set(conversation_reads::last_read_at.eq(now))
            .execute(conn)?;

        Ok::<_, AppError>(marked)
    })?;

    Ok(ReadReceipt { conversation_id, reader_id: reader, marked, last_read_at: now })
}

/// Loads a message and checks that `user` may see it.
fn accessible_message(conn: &mut PgConnection, message_id: Uuid, user: Uuid) -> AppResult<Message> {
    let message = messages::table
        .find(message_id)
        .select(Message::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::new(ErrorCode::MessageNotFound, "message not found"))?;
    member_conversation(conn, message.conversation_id, user)?;
    Ok(message)
}

/// One reaction per user per message; a second call replaces the emoji.
pub fn react(conn: &mut PgConnection, message_id: Uuid, user: Uuid, emoji: &str) -> AppResult<(Message, Reaction)> {
    let emoji = validate_emoji(emoji)?;
    let message = accessible_message(conn, message_id, user)?;
    let now = Utc::now();

    let reaction = diesel::insert_into(message_reactions::table)
        .values(&Reaction {
            message_id,
            user_id: user,
            emoji: emoji.to_string(),
            reacted_at: now,
        })
        .on_conflict((message_reactions::message_id, message_reactions::user_id))
        .do_update()
        .set((
            message_reactions::emoji.eq(emoji),
            message_reactions::reacted_at.eq(now),
        ))
        .returning(Reaction::as_returning())
        .get_result(conn)?;

    Ok((message, reaction))
}

/// Removes the caller's reaction. Returns whether one existed.
pub fn unreact(conn: &mut PgConnection, message_id: Uuid, user: Uuid) -> AppResult<(Message, bool)> {
    let message = accessible_message(conn, message_id, user)?;
    let removed = diesel::delete(
        message_reactions::table
            .filter(message_reactions::message_id.eq(message_id))
            .filter(message_reactions::user_id.eq(user)),
    )
    .execute(conn)?;
    Ok((message, removed > 0))
}

pub fn list_conversations(conn: &mut PgConnection, user: Uuid) -> AppResult<Vec<ConversationSummary>> {
    let convs = conversations::table
        .filter(conversations::user_a_id.eq(user).or(conversations::user_b_id.eq(user)))
        .select(Conversation::as_select())
        .load(conn)?;

    if convs.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<Uuid> = convs.iter().map(|c| c.id).collect();
    let peer_ids: Vec<Uuid> = convs.iter().map(|c| c.peer_of(user)).collect();

    let mut peers: HashMap<Uuid, UserSummary> = users::table
        .filter(users::id.eq_any(&peer_ids))
        .select(UserSummary::as_select())
        .load(conn)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let last_messages: HashMap<Uuid, Message> = messages::table
        .filter(messages::conversation_id.eq_any(&ids))
        .distinct_on(messages::conversation_id)
        .order((messages::conversation_id, messages::sent_at.desc(), messages::id.desc()))
        .select(Message::as_select())
        .load(conn)?
        .into_iter()
        .map(|m| (m.conversation_id, m))
        .collect();

    let unread: HashMap<Uuid, i64> = messages::table
        .filter(messages::conversation_id.eq_any(&ids))
        .filter(messages::sender_id.ne(user))
        .filter(messages::is_read.eq(false))
        .group_by(messages::conversation_id)
        .select((messages::conversation_id, count_star()))
        .load::<(Uuid, i64)>(conn)?
        .into_iter()
        .collect();

    let mut summaries: Vec<(DateTime<Utc>, ConversationSummary)> = convs
        .into_iter()
        .filter_map(|c| {
            let peer = peers.remove(&c.peer_of(user))?;
            let last_message = last_messages.get(&c.id).map(|m| LastMessage {
                content: m.content.clone(),
                kind: m.kind.clone(),
                sent_at: m.sent_at,
                is_own: m.sender_id == user,
            });
            let activity = c.last_message_at.unwrap_or(c.created_at);
            Some((
                activity,
                ConversationSummary {
                    id: c.id,
                    peer,
                    last_message,
                    last_message_at: c.last_message_at,
                    unread_count: unread.get(&c.id).copied().unwrap_or(0),
                },
            ))
        })
        .collect();

    summaries.sort_by(|a, b| b.0.cmp(&a.0));
    Ok(summaries.into_iter().map(|(_, s)| s).collect())
}
