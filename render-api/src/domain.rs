//! Status values and the transition rules between them. Everything here is
//! pure so it can be tested without a database.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use render_shared::errors::{AppError, ErrorCode};
use render_shared::types::auth::UserRole;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(AppError::internal(format!(
                        "unknown {} value in store: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

string_enum!(FriendshipStatus {
    Pending => "pending",
    Accepted => "accepted",
});

string_enum!(AdminRequestStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
});

string_enum!(ImageStatus {
    Pending => "pending",
    Processed => "processed",
    Error => "error",
});

string_enum!(MessageKind {
    Text => "text",
    Image => "image",
});

impl ImageStatus {
    /// `processed` is terminal; `error` may be retried.
    pub fn can_transition_to(&self, next: ImageStatus) -> bool {
        matches!(
            (self, next),
            (ImageStatus::Pending, ImageStatus::Processed)
                | (ImageStatus::Pending, ImageStatus::Error)
                | (ImageStatus::Error, ImageStatus::Processed)
                | (ImageStatus::Error, ImageStatus::Error)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ImageStatus::Processed)
    }
}

/// How a search result relates to the user who searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    RequestSent,
    RequestReceived,
    Friends,
}

/// Relation of `viewer` to the other side of a friendship edge, if any.
pub fn relation_from_edge(
    viewer: Uuid,
    requester_id: Uuid,
    status: FriendshipStatus,
) -> Relation {
    match status {
        FriendshipStatus::Accepted => Relation::Friends,
        FriendshipStatus::Pending if requester_id == viewer => Relation::RequestSent,
        FriendshipStatus::Pending => Relation::RequestReceived,
    }
}

/// Orders a pair so that the smaller id comes first. Conversations are keyed
/// by this order.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// The other participant of a canonical pair.
pub fn peer_of(user: Uuid, pair: (Uuid, Uuid)) -> Uuid {
    if pair.0 == user { pair.1 } else { pair.0 }
}

/// Role after an approved admin request. Never lowers a superadmin.
pub fn promoted_role(current: UserRole) -> UserRole {
    current.max(UserRole::Admin)
}

pub const MAX_MESSAGE_CHARS: usize = 2000;
pub const MAX_EMOJI_BYTES: usize = 16;
pub const MAX_REASON_CHARS: usize = 1000;

pub fn validate_message_content(content: &str) -> Result<&str, AppError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(ErrorCode::EmptyMessage, "message content is required"));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            format!("message exceeds {MAX_MESSAGE_CHARS} characters"),
        ));
    }
    Ok(trimmed)
}

pub fn validate_emoji(emoji: &str) -> Result<&str, AppError> {
    let trimmed = emoji.trim();
    if trimmed.is_empty() || trimmed.len() > MAX_EMOJI_BYTES || trimmed.chars().any(char::is_whitespace) {
        return Err(AppError::new(ErrorCode::InvalidEmoji, "reaction must be a single emoji"));
    }
    Ok(trimmed)
}

pub fn validate_reason(reason: &str) -> Result<&str, AppError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(AppError::new(ErrorCode::ReasonRequired, "a reason is required"));
    }
    if trimmed.chars().count() > MAX_REASON_CHARS {
        return Err(AppError::new(
            ErrorCode::ValidationError,
            format!("reason exceeds {MAX_REASON_CHARS} characters"),
        ));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processed_images_cannot_move() {
        for next in [ImageStatus::Pending, ImageStatus::Processed, ImageStatus::Error] {
            assert!(!ImageStatus::Processed.can_transition_to(next));
        }
        assert!(ImageStatus::Processed.is_terminal());
    }

    #[test]
    fn failed_images_can_be_retried() {
        assert!(ImageStatus::Error.can_transition_to(ImageStatus::Processed));
        assert!(ImageStatus::Error.can_transition_to(ImageStatus::Error));
        assert!(!ImageStatus::Error.can_transition_to(ImageStatus::Pending));
        assert!(ImageStatus::Pending.can_transition_to(ImageStatus::Error));
    }

    #[test]
    fn status_strings_round_trip() {
        for s in [ImageStatus::Pending, ImageStatus::Processed, ImageStatus::Error] {
            assert_eq!(s.as_str().parse::<ImageStatus>().unwrap(), s);
        }
        assert!("enhanced".parse::<ImageStatus>().is_err());
        assert_eq!("approved".parse::<AdminRequestStatus>().unwrap(), AdminRequestStatus::Approved);
    }

    #[test]
    fn canonical_pair_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(canonical_pair(a, b), canonical_pair(b, a));
        let (low, high) = canonical_pair(a, b);
        assert!(low < high);
        assert_eq!(peer_of(a, (low, high)), b);
        assert_eq!(peer_of(b, (low, high)), a);
    }

    #[test]
    fn relation_depends_on_who_asked() {
        let me = Uuid::new_v4();
        let them = Uuid::new_v4();
        assert_eq!(relation_from_edge(me, me, FriendshipStatus::Pending), Relation::RequestSent);
        assert_eq!(relation_from_edge(me, them, FriendshipStatus::Pending), Relation::RequestReceived);
        assert_eq!(relation_from_edge(me, them, FriendshipStatus::Accepted), Relation::Friends);
    }

    #[test]
    fn promotion_keeps_superadmin() {
        assert_eq!(promoted_role(UserRole::User), UserRole::Admin);
        assert_eq!(promoted_role(UserRole::Admin), UserRole::Admin);
        assert_eq!(promoted_role(UserRole::Superadmin), UserRole::Superadmin);
    }

    #[test]
    fn message_content_is_trimmed_and_bounded() {
        assert_eq!(validate_message_content("  hola  ").unwrap(), "hola");
        assert_eq!(validate_message_content("   ").unwrap_err().code(), ErrorCode::EmptyMessage);
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(validate_message_content(&long).unwrap_err().code(), ErrorCode::ValidationError);
    }

    #[test]
    fn emoji_validation() {
        assert_eq!(validate_emoji("👍").unwrap(), "👍");
        assert_eq!(validate_emoji("❤️").unwrap(), "❤️");
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji("a b").is_err());
        assert!(validate_emoji(&"😀".repeat(5)).is_err());
    }

    #[test]
    fn reason_is_required() {
        assert_eq!(validate_reason("  ").unwrap_err().code(), ErrorCode::ReasonRequired);
        assert_eq!(validate_reason(" I moderate the forum ").unwrap(), "I moderate the forum");
    }
}
