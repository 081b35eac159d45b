pub mod config;
pub mod domain;
pub mod events;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{delete, get, post, put};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use render_shared::clients::db::{checkout, DbPool};
use render_shared::clients::enhancer::EnhancerClient;
use render_shared::clients::storage::LocalStorage;
use render_shared::errors::AppResult;
use render_shared::middleware::{metrics_middleware, AuthState};
use render_shared::types::auth::ResolvedIdentity;

use crate::config::AppConfig;
use crate::events::EventBus;
use crate::services::upload::UploadPolicy;

pub struct AppState {
    pub db: DbPool,
    pub config: AppConfig,
    pub storage: LocalStorage,
    pub enhancer: EnhancerClient,
    pub events: EventBus,
    pub metrics_handle: metrics_exporter_prometheus::PrometheusHandle,
}

impl AppState {
    pub fn image_policy(&self) -> UploadPolicy {
        UploadPolicy::photos(self.config.max_image_bytes)
    }

    pub fn avatar_policy(&self) -> UploadPolicy {
        UploadPolicy::photos(self.config.max_avatar_bytes)
    }

    pub fn chat_policy(&self) -> UploadPolicy {
        UploadPolicy::chat(self.config.max_chat_image_bytes)
    }
}

impl AuthState for AppState {
    fn jwt_secret(&self) -> &str {
        &self.config.jwt_secret
    }

    fn resolve_identity(&self, user_id: Uuid) -> AppResult<Option<ResolvedIdentity>> {
        let mut conn = checkout(&self.db)?;
        services::user_service::resolve_identity(&mut conn, user_id)
    }
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origin_list()
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCEPT,
        ]))
        .allow_credentials(true)
}

/// All API routes, mounted under `/api`, plus static serving of uploads.
pub fn build_router(state: Arc<AppState>) -> Router {
    use routes::{admin, auth, chat, friends, health, images, sse, user};

    let image_limit = DefaultBodyLimit::max(state.image_policy().body_limit());
    let avatar_limit = DefaultBodyLimit::max(state.avatar_policy().body_limit());
    let chat_limit = DefaultBodyLimit::max(state.chat_policy().body_limit());

    let api = Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::metrics))
        // Auth
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        // Profile
        .route("/user/profile", get(user::get_profile).put(user::update_profile))
        .route("/user/profile/photo", post(user::upload_photo).layer(avatar_limit))
        .route("/user/notifications", get(user::list_notifications))
        .route("/user/notifications/read", put(user::mark_notifications_read))
        .route("/user/admin-request", get(user::get_admin_request).post(user::create_admin_request))
        // Friends
        .route("/friends", get(friends::list_friends))
        .route("/friends/search", get(friends::search_users))
        .route("/friends/requests", get(friends::list_requests))
        .route("/friends/request", post(friends::send_request))
        .route("/friends/accept/:id", post(friends::accept_request))
        .route("/friends/reject/:id", post(friends::reject_request))
        // Images
        .route("/images", get(images::list_images))
        .route("/images/models", get(images::list_models))
        .route("/images/upload", post(images::upload_image).layer(image_limit))
        .route("/images/:id", delete(images::delete_image))
        .route("/images/:id/results", get(images::get_results))
        .route("/images/:id/enhance", post(images::enhance_image))
        .route("/images/:id/enhance-combined", post(images::enhance_image_combined))
        // Chat
        .route("/chat/conversations", get(chat::list_conversations))
        .route("/chat/conversation/:friend_id", get(chat::get_or_create_conversation))
        .route("/chat/messages/:conversation_id", get(chat::list_messages).post(chat::send_message))
        .route("/chat/messages/:conversation_id/image", post(chat::send_image).layer(chat_limit))
        .route("/chat/messages/:conversation_id/read", put(chat::mark_read))
        .route("/chat/reactions/:message_id", post(chat::add_reaction).delete(chat::remove_reaction))
        .route("/chat/events", get(sse::chat_events))
        // Admin
        .route("/admin/pending", get(admin::list_pending_requests))
        .route("/admin/handle", put(admin::handle_request))
        .route("/admin/list", get(admin::list_admins))
        .route("/admin/remove/:user_id", delete(admin::remove_admin))
        .route("/admin/users", get(admin::list_users))
        .route("/admin/users/:user_id", get(admin::user_details))
        .route("/admin/friend-requests", get(admin::list_friend_requests))
        .route("/admin/friend-requests/:id/accept", post(admin::accept_friend_request))
        .route("/admin/friend-requests/:id/reject", post(admin::reject_friend_request));

    let uploads = ServeDir::new(state.storage.root());
    let public_prefix = state.config.public_prefix.clone();
    let cors = cors_layer(&state.config);

    Router::new()
        .nest("/api", api)
        .nest_service(&public_prefix, uploads)
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
