//! In-process fan-out of chat activity to connected event streams.
//!
//! The bus is best effort: the database stays the source of truth and
//! clients that miss an event catch up through the REST endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::services::chat_service::{MessageView, ReactionView, ReadReceipt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChatEventType {
    #[serde(rename = "message.created")]
    MessageCreated,
    #[serde(rename = "messages.read")]
    MessagesRead,
    #[serde(rename = "reaction.updated")]
    ReactionUpdated,
}

impl ChatEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreated => "message.created",
            Self::MessagesRead => "messages.read",
            Self::ReactionUpdated => "reaction.updated",
        }
    }
}

impl std::fmt::Display for ChatEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionChange {
    pub message_id: Uuid,
    pub user_id: Uuid,
    /// `None` when the reaction was removed.
    pub reaction: Option<ReactionView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatPayload {
    Message(MessageView),
    Read(ReadReceipt),
    Reaction(ReactionChange),
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: ChatEventType,
    pub conversation_id: Uuid,
    /// Both participants. Only they receive the event.
    #[serde(skip)]
    pub audience: [Uuid; 2],
    pub occurred_at: DateTime<Utc>,
    pub payload: ChatPayload,
}

impl ChatEvent {
    fn new(event_type: ChatEventType, conversation_id: Uuid, audience: [Uuid; 2], payload: ChatPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type,
            conversation_id,
            audience,
            occurred_at: Utc::now(),
            payload,
        }
    }

    pub fn message_created(audience: [Uuid; 2], message: MessageView) -> Self {
        Self::new(ChatEventType::MessageCreated, message.conversation_id, audience, ChatPayload::Message(message))
    }

    pub fn messages_read(audience: [Uuid; 2], receipt: ReadReceipt) -> Self {
        Self::new(ChatEventType::MessagesRead, receipt.conversation_id, audience, ChatPayload::Read(receipt))
    }

    pub fn reaction_updated(audience: [Uuid; 2], conversation_id: Uuid, change: ReactionChange) -> Self {
        Self::new(ChatEventType::ReactionUpdated, conversation_id, audience, ChatPayload::Reaction(change))
    }

    pub fn is_visible_to(&self, user: Uuid) -> bool {
        self.audience.contains(&user)
    }
}

/// Broadcast channel for [`ChatEvent`]s. Subscribers that fall more than
/// `capacity` events behind skip ahead.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatEvent>,
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers reached. Zero is normal when nobody
    /// is connected.
    pub fn emit(&self, event: ChatEvent) -> usize {
        tracing::debug!(event_type = %event.event_type, event_id = %event.id, "chat event emitted");
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(conversation_id: Uuid, reader_id: Uuid) -> ReadReceipt {
        ReadReceipt { conversation_id, reader_id, marked: 2, last_read_at: Utc::now() }
    }

    #[test]
    fn event_type_serialization() {
        let json = serde_json::to_string(&ChatEventType::MessageCreated).unwrap();
        assert_eq!(json, "\"message.created\"");
        let parsed: ChatEventType = serde_json::from_str("\"reaction.updated\"").unwrap();
        assert_eq!(parsed, ChatEventType::ReactionUpdated);
    }

    #[test]
    fn audience_is_not_serialized() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let conv = Uuid::new_v4();
        let evt = ChatEvent::messages_read([a, b], receipt(conv, a));
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "messages.read");
        assert_eq!(json["conversation_id"], conv.to_string());
        assert_eq!(json["payload"]["marked"], 2);
        assert!(json.get("audience").is_none());
    }

    #[test]
    fn only_participants_see_events() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let evt = ChatEvent::messages_read([a, b], receipt(Uuid::new_v4(), a));
        assert!(evt.is_visible_to(a));
        assert!(evt.is_visible_to(b));
        assert!(!evt.is_visible_to(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn bus_fanout() {
        let bus = EventBus::with_capacity(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let n = bus.emit(ChatEvent::messages_read([a, b], receipt(Uuid::new_v4(), b)));
        assert_eq!(n, 2);
        assert_eq!(rx1.recv().await.unwrap().id, rx2.recv().await.unwrap().id);
    }

    #[test]
    fn emit_without_subscribers_is_fine() {
        let bus = EventBus::with_capacity(1);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(bus.emit(ChatEvent::messages_read([a, b], receipt(Uuid::new_v4(), a))), 0);
    }
}
