pub mod admin;
pub mod auth;
pub mod chat;
pub mod friends;
pub mod health;
pub mod images;
pub mod sse;
pub mod user;
