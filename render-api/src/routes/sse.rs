//! `GET /chat/events`: live chat activity as server-sent events.
//!
//! Each frame carries `event: <type>`, `id: <event id>` and the JSON event
//! as `data`. Only events from conversations the caller takes part in are
//! sent. A comment heartbeat goes out every 15 seconds.

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use render_shared::types::auth::AuthUser;

use crate::events::ChatEvent;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ChatStreamQuery {
    /// Restrict the stream to one conversation.
    pub conversation_id: Option<Uuid>,
}

impl ChatStreamQuery {
    fn matches(&self, viewer: Uuid, event: &ChatEvent) -> bool {
        if !event.is_visible_to(viewer) {
            return false;
        }
        match self.conversation_id {
            Some(id) => event.conversation_id == id,
            None => true,
        }
    }
}

fn to_frame(event: &ChatEvent) -> Option<SseEvent> {
    match serde_json::to_string(event) {
        Ok(json) => Some(
            SseEvent::default()
                .event(event.event_type.as_str())
                .id(event.id.to_string())
                .data(json),
        ),
        Err(e) => {
            tracing::warn!(event_id = %event.id, error = %e, "failed to serialize chat event");
            None
        }
    }
}

pub async fn chat_events(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatStreamQuery>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.events.subscribe();
    let viewer = user.id;

    tracing::info!(user_id = %viewer, conversation_id = ?query.conversation_id, "chat stream connected");

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !query.matches(viewer, &event) {
                        continue;
                    }
                    if let Some(frame) = to_frame(&event) {
                        yield Ok(frame);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id = %viewer, skipped, "chat stream lagged");
                    // Tell the client to resync over REST.
                    let notice = SseEvent::default()
                        .event("_lagged")
                        .data(serde_json::json!({ "skipped": skipped }).to_string());
                    yield Ok(notice);
                }
                Err(RecvError::Closed) => {
                    tracing::info!(user_id = %viewer, "event bus closed, ending chat stream");
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat_service::ReadReceipt;
    use chrono::Utc;

    fn read_event(a: Uuid, b: Uuid, conversation_id: Uuid) -> ChatEvent {
        ChatEvent::messages_read(
            [a, b],
            ReadReceipt { conversation_id, reader_id: a, marked: 1, last_read_at: Utc::now() },
        )
    }

    #[test]
    fn outsiders_never_match() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let evt = read_event(a, b, Uuid::new_v4());
        let query = ChatStreamQuery::default();
        assert!(query.matches(a, &evt));
        assert!(query.matches(b, &evt));
        assert!(!query.matches(Uuid::new_v4(), &evt));
    }

    #[test]
    fn conversation_filter() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let wanted = Uuid::new_v4();
        let query = ChatStreamQuery { conversation_id: Some(wanted) };
        assert!(query.matches(a, &read_event(a, b, wanted)));
        assert!(!query.matches(a, &read_event(a, b, Uuid::new_v4())));
    }

    #[test]
    fn frame_is_built_for_serializable_event() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(to_frame(&read_event(a, b, Uuid::new_v4())).is_some());
    }
}
