//! Enhancement requests through the real router, against a stub enhancer
//! on an ephemeral port.
//!
//! Needs `DATABASE_URL`; run with `cargo test -- --ignored`. The pool holds a
//! single connection inside a test transaction, so nothing is committed.

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool, TestCustomizer};
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use render_api::config::AppConfig;
use render_api::events::EventBus;
use render_api::models::{Image, User};
use render_api::services::{auth_service, image_service};
use render_api::{build_router, AppState};
use render_shared::clients::db::checkout;
use render_shared::clients::enhancer::EnhancerClient;
use render_shared::clients::storage::{LocalStorage, StorageCategory};
use render_shared::middleware::detached_metrics_handle;
use render_shared::types::auth::{Claims, UserRole};

const SECRET: &str = "enhancement-test-secret";
const DOWN: &str = include_str!("../migrations/2024-05-01-000000_create_render_schema/down.sql");
const UP: &str = include_str!("../migrations/2024-05-01-000000_create_render_schema/up.sql");

#[derive(Clone, Copy)]
enum Stub {
    Succeeds,
    Crashes,
}

async fn spawn_enhancer(behavior: Stub) -> String {
    let handler = move || async move {
        match behavior {
            Stub::Succeeds => (
                StatusCode::OK,
                [
                    ("content-type", "image/png"),
                    ("x-processing-time", "0.42s"),
                    ("x-model-used", "realesrgan-x4plus"),
                    ("x-scale-factor", "4x"),
                ],
                b"enhanced-png-bytes".to_vec(),
            )
                .into_response(),
            Stub::Crashes => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Traceback: /opt/models/weights.pth CUDA out of memory",
            )
                .into_response(),
        }
    };
    let stub = Router::new()
        .route("/enhance", post(handler))
        .route("/enhance_combined", post(handler));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, stub).await.unwrap();
    });
    format!("http://{addr}")
}

struct Harness {
    state: Arc<AppState>,
    app: Router,
    _uploads: tempfile::TempDir,
}

async fn harness(behavior: Stub) -> Harness {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for enhancement tests");
    let uploads = tempfile::tempdir().unwrap();
    let enhancer_url = spawn_enhancer(behavior).await;

    let config = AppConfig {
        jwt_secret: SECRET.to_string(),
        upload_dir: uploads.path().to_string_lossy().into_owned(),
        enhancer_url: enhancer_url.clone(),
        ..AppConfig::default()
    };

    let db = Pool::builder()
        .max_size(1)
        .connection_customizer(Box::new(TestCustomizer))
        .build(ConnectionManager::<PgConnection>::new(url))
        .unwrap();
    {
        let mut conn = db.get().unwrap();
        conn.batch_execute(DOWN).unwrap();
        conn.batch_execute(UP).unwrap();
    }

    let storage = LocalStorage::new(uploads.path(), &config.public_prefix);
    storage.ensure_layout().await.unwrap();

    let state = Arc::new(AppState {
        db,
        storage,
        enhancer: EnhancerClient::new(&enhancer_url, Duration::from_secs(5)).unwrap(),
        events: EventBus::with_capacity(8),
        metrics_handle: detached_metrics_handle(),
        config,
    });
    Harness { app: build_router(state.clone()), state, _uploads: uploads }
}

impl Harness {
    fn user(&self, name: &str) -> User {
        let mut conn = checkout(&self.state.db).unwrap();
        auth_service::register_user(&mut conn, name, &format!("{name}@example.com"), "secret123").unwrap()
    }

    async fn uploaded_image(&self, owner: &User) -> Image {
        let stored = self
            .state
            .storage
            .save(StorageCategory::Images, "png", b"original-png-bytes")
            .await
            .unwrap();
        let mut conn = checkout(&self.state.db).unwrap();
        image_service::create_image(&mut conn, owner.id, "cat.png", "image/png", &stored, None).unwrap()
    }

    fn status_of(&self, image_id: Uuid, owner: Uuid) -> (String, Option<serde_json::Value>) {
        let mut conn = checkout(&self.state.db).unwrap();
        let view = image_service::get_result(&mut conn, image_id, owner).unwrap();
        (view.status, view.metadata)
    }

    async fn enhance(&self, owner: &User, image_id: Uuid) -> (StatusCode, String) {
        let claims = Claims::new(owner.id, &owner.email, UserRole::User, 3600);
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        let resp = self
            .app
            .clone()
            .oneshot(
                Request::post(format!("/api/images/{image_id}/enhance"))
                    .header(header::AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[tokio::test]
#[ignore]
async fn successful_enhancement_then_chained_re_enhancement() {
    let h = harness(Stub::Succeeds).await;
    let alice = h.user("alice");
    let image = h.uploaded_image(&alice).await;

    let (status, body) = h.enhance(&alice, image.id).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["data"]["id"], image.id.to_string());
    assert_eq!(json["data"]["status"], "processed");
    let result_url = json["data"]["result"]["url"].as_str().unwrap().to_string();
    assert!(result_url.starts_with("/uploads/enhanced/"), "{result_url}");
    assert_eq!(json["data"]["result"]["metadata"]["scale_factor"], 4);
    assert_eq!(h.state.storage.read(&result_url).await.unwrap(), b"enhanced-png-bytes");

    // The processed image stays as it is; a chained copy gets enhanced.
    let (status, body) = h.enhance(&alice, image.id).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_ne!(json["data"]["id"], image.id.to_string());
    assert_eq!(json["data"]["source_image_id"], image.id.to_string());
    assert_eq!(json["data"]["status"], "processed");

    let (status, _) = h.status_of(image.id, alice.id);
    assert_eq!(status, "processed");
}

#[tokio::test]
#[ignore]
async fn enhancer_crash_leaves_image_in_error_and_hides_upstream_text() {
    let h = harness(Stub::Crashes).await;
    let alice = h.user("alice");
    let image = h.uploaded_image(&alice).await;

    let (status, body) = h.enhance(&alice, image.id).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "E4006");
    assert!(!body.contains("Traceback"), "{body}");

    let (status, metadata) = h.status_of(image.id, alice.id);
    assert_eq!(status, "error");
    assert_eq!(metadata.unwrap()["error_code"], "E4006");
}

#[tokio::test]
#[ignore]
async fn missing_source_file_leaves_image_in_error() {
    let h = harness(Stub::Succeeds).await;
    let alice = h.user("alice");
    let image = h.uploaded_image(&alice).await;
    h.state.storage.delete_best_effort(&image.original_path).await;

    let (status, body) = h.enhance(&alice, image.id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["code"], "E4002");

    let (status, metadata) = h.status_of(image.id, alice.id);
    assert_eq!(status, "error");
    assert_eq!(metadata.unwrap()["error_code"], "E4002");
}

#[tokio::test]
#[ignore]
async fn other_users_cannot_enhance_and_state_is_untouched() {
    let h = harness(Stub::Succeeds).await;
    let alice = h.user("alice");
    let bob = h.user("bob");
    let image = h.uploaded_image(&alice).await;

    let (status, _) = h.enhance(&bob, image.id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = h.status_of(image.id, alice.id);
    assert_eq!(status, "pending");
}
