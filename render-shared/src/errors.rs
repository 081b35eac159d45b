use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use diesel::result::DatabaseErrorKind;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Auth errors
/// - E2xxx: User errors
/// - E3xxx: Friendship errors
/// - E4xxx: Image errors
/// - E5xxx: Chat errors
/// - E6xxx: Admin errors
/// - E7xxx: Notification errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    Conflict,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Auth (E1xxx)
    InvalidCredentials,
    EmailAlreadyExists,
    TokenExpired,
    TokenInvalid,
    PasswordTooWeak,

    // User (E2xxx)
    UserNotFound,
    PhotoUploadFailed,

    // Friendship (E3xxx)
    CannotFriendSelf,
    FriendshipExists,
    FriendRequestNotFound,
    RequestNotPending,
    NotFriends,

    // Images (E4xxx)
    ImageNotFound,
    ImageFileMissing,
    UnsupportedImageType,
    ImageTooLarge,
    ImageAlreadyProcessed,
    EnhancementFailed,
    UpstreamUnavailable,

    // Chat (E5xxx)
    ConversationNotFound,
    NotConversationMember,
    MessageNotFound,
    EmptyMessage,
    InvalidEmoji,

    // Admin (E6xxx)
    AdminRequestNotFound,
    AdminRequestPending,
    AdminRequestDecided,
    ReasonRequired,
    NotAnAdmin,
    ProtectedAccount,

    // Notification (E7xxx)
    NotificationFailed,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::Conflict => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            // Auth
            Self::InvalidCredentials => "E1001",
            Self::EmailAlreadyExists => "E1002",
            Self::TokenExpired => "E1003",
            Self::TokenInvalid => "E1004",
            Self::PasswordTooWeak => "E1005",

            // User
            Self::UserNotFound => "E2001",
            Self::PhotoUploadFailed => "E2002",

            // Friendship
            Self::CannotFriendSelf => "E3001",
            Self::FriendshipExists => "E3002",
            Self::FriendRequestNotFound => "E3003",
            Self::RequestNotPending => "E3004",
            Self::NotFriends => "E3005",

            // Images
            Self::ImageNotFound => "E4001",
            Self::ImageFileMissing => "E4002",
            Self::UnsupportedImageType => "E4003",
            Self::ImageTooLarge => "E4004",
            Self::ImageAlreadyProcessed => "E4005",
            Self::EnhancementFailed => "E4006",
            Self::UpstreamUnavailable => "E4007",

            // Chat
            Self::ConversationNotFound => "E5001",
            Self::NotConversationMember => "E5002",
            Self::MessageNotFound => "E5003",
            Self::EmptyMessage => "E5004",
            Self::InvalidEmoji => "E5005",

            // Admin
            Self::AdminRequestNotFound => "E6001",
            Self::AdminRequestPending => "E6002",
            Self::AdminRequestDecided => "E6003",
            Self::ReasonRequired => "E6004",
            Self::NotAnAdmin => "E6005",
            Self::ProtectedAccount => "E6006",

            // Notification
            Self::NotificationFailed => "E7001",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError | Self::NotificationFailed => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::ValidationError | Self::BadRequest | Self::PasswordTooWeak
            | Self::PhotoUploadFailed | Self::CannotFriendSelf | Self::UnsupportedImageType
            | Self::ImageTooLarge | Self::EmptyMessage | Self::InvalidEmoji
            | Self::ReasonRequired => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::UserNotFound | Self::FriendRequestNotFound
            | Self::ImageNotFound | Self::ImageFileMissing | Self::ConversationNotFound
            | Self::MessageNotFound | Self::AdminRequestNotFound
            | Self::NotAnAdmin => StatusCode::NOT_FOUND,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired
            | Self::TokenInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::NotFriends | Self::NotConversationMember
            | Self::ProtectedAccount => StatusCode::FORBIDDEN,
            Self::Conflict | Self::EmailAlreadyExists | Self::FriendshipExists
            | Self::RequestNotPending | Self::AdminRequestPending | Self::AdminRequestDecided
            | Self::ImageAlreadyProcessed => StatusCode::CONFLICT,
            Self::EnhancementFailed | Self::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// The error code this error is reported with.
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
            AppError::Database(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
                ErrorCode::Conflict
            }
            AppError::Database(_) => ErrorCode::InternalError,
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// True when the database rejected a write on a unique constraint.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            AppError::Database(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _))
        )
    }
}

/// Maps a unique-constraint violation to a specific conflict error, passing
/// every other diesel error through unchanged.
pub fn on_unique_violation(err: diesel::result::Error, code: ErrorCode, message: &str) -> AppError {
    match err {
        diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::new(code, message)
        }
        other => AppError::Database(other),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                if status.is_server_error() {
                    tracing::error!(code = code.code(), error = %message, details = ?details, "request failed");
                }
                // 500s describe server internals; the client only gets the code.
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    return (status, Json(ApiErrorResponse::new(code.code(), "internal server error"))).into_response();
                }
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => match err {
                diesel::result::Error::NotFound => (
                    StatusCode::NOT_FOUND,
                    ApiErrorResponse::new("E0003", "resource not found"),
                ),
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    tracing::warn!(error = %err, "unique constraint violated");
                    (
                        StatusCode::CONFLICT,
                        ApiErrorResponse::new("E0006", "resource already exists"),
                    )
                }
                _ => {
                    tracing::error!(error = %err, "database error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    )
                }
            },
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
