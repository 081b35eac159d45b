pub mod admin_service;
pub mod auth_service;
pub mod chat_service;
pub mod friend_service;
pub mod image_service;
pub mod notification_service;
pub mod token_service;
pub mod upload;
pub mod user_service;
