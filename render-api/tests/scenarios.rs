//! End-to-end service scenarios against PostgreSQL.
//!
//! Needs `DATABASE_URL`; run with `cargo test -- --ignored`. Each test
//! rebuilds the schema inside a transaction that is never committed, so
//! the database is left untouched.

use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use uuid::Uuid;

use render_api::domain::ImageStatus;
use render_api::models::{NewMessage, User};
use render_api::services::friend_service::FriendTarget;
use render_api::services::image_service::EnhancementSource;
use render_api::services::{
    admin_service, auth_service, chat_service, friend_service, image_service, notification_service,
};
use render_shared::clients::enhancer::{EnhanceParams, EnhancementReport};
use render_shared::clients::storage::StoredFile;
use render_shared::errors::{AppError, ErrorCode};
use render_shared::types::auth::UserRole;
use render_shared::types::PaginationParams;

const DOWN: &str = include_str!("../migrations/2024-05-01-000000_create_render_schema/down.sql");
const UP: &str = include_str!("../migrations/2024-05-01-000000_create_render_schema/up.sql");

fn conn() -> PgConnection {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for scenario tests");
    let mut conn = PgConnection::establish(&url).expect("connect to test database");
    conn.begin_test_transaction().expect("begin test transaction");
    conn.batch_execute(DOWN).expect("drop schema");
    conn.batch_execute(UP).expect("create schema");
    conn
}

fn user(conn: &mut PgConnection, name: &str) -> User {
    auth_service::register_user(conn, name, &format!("{name}@example.com"), "secret123").unwrap()
}

fn befriend(conn: &mut PgConnection, a: &User, b: &User) {
    let edge = friend_service::send_request(conn, a.id, &FriendTarget::Id(b.id)).unwrap();
    friend_service::accept_request(conn, edge.id, b.id).unwrap();
}

fn stored(path: &str, size: i64) -> StoredFile {
    StoredFile {
        relative_path: path.to_string(),
        public_url: format!("/uploads/{path}"),
        size_bytes: size,
    }
}

fn code(err: AppError) -> ErrorCode {
    err.code()
}

// --- Auth ---

#[test]
#[ignore]
fn duplicate_email_is_rejected_case_insensitively() {
    let mut conn = conn();
    user(&mut conn, "alice");
    let err = auth_service::register_user(&mut conn, "Alice2", "ALICE@example.com", "secret123").unwrap_err();
    assert_eq!(code(err), ErrorCode::EmailAlreadyExists);
}

#[test]
#[ignore]
fn login_checks_password() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let found = auth_service::authenticate(&mut conn, " Alice@Example.com ", "secret123").unwrap();
    assert_eq!(found.id, alice.id);
    let err = auth_service::authenticate(&mut conn, "alice@example.com", "wrong1").unwrap_err();
    assert_eq!(code(err), ErrorCode::InvalidCredentials);
    let err = auth_service::authenticate(&mut conn, "nobody@example.com", "secret123").unwrap_err();
    assert_eq!(code(err), ErrorCode::InvalidCredentials);
}

// --- Friendships ---

#[test]
#[ignore]
fn friendship_lifecycle() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");

    let edge = friend_service::send_request(&mut conn, alice.id, &FriendTarget::Name("bob".into())).unwrap();
    assert_eq!(edge.status, "pending");
    assert!(!friend_service::are_friends(&mut conn, alice.id, bob.id).unwrap());

    // Only the addressee may answer.
    let err = friend_service::accept_request(&mut conn, edge.id, alice.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::FriendRequestNotFound);

    let accepted = friend_service::accept_request(&mut conn, edge.id, bob.id).unwrap();
    assert_eq!(accepted.status, "accepted");
    assert!(accepted.responded_at.is_some());
    assert!(friend_service::are_friends(&mut conn, bob.id, alice.id).unwrap());

    let friends = friend_service::list_friends(&mut conn, alice.id).unwrap();
    assert_eq!(friends.len(), 1);
    assert_eq!(friends[0].user.id, bob.id);

    let err = friend_service::accept_request(&mut conn, edge.id, bob.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::RequestNotPending);
}

#[test]
#[ignore]
fn duplicate_request_conflicts_in_either_direction() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");

    friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(bob.id)).unwrap();
    let again = friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(bob.id)).unwrap_err();
    assert_eq!(code(again), ErrorCode::FriendshipExists);
    let reverse = friend_service::send_request(&mut conn, bob.id, &FriendTarget::Id(alice.id)).unwrap_err();
    assert_eq!(code(reverse), ErrorCode::FriendshipExists);

    let own = friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(alice.id)).unwrap_err();
    assert_eq!(code(own), ErrorCode::CannotFriendSelf);
    let ghost = friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(Uuid::new_v4())).unwrap_err();
    assert_eq!(code(ghost), ErrorCode::UserNotFound);
}

#[test]
#[ignore]
fn rejected_pair_may_request_again() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");

    let edge = friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(bob.id)).unwrap();
    friend_service::reject_request(&mut conn, edge.id, bob.id).unwrap();
    assert!(friend_service::find_edge(&mut conn, alice.id, bob.id).unwrap().is_none());

    let again = friend_service::send_request(&mut conn, bob.id, &FriendTarget::Id(alice.id)).unwrap();
    assert_eq!(again.requester_id, bob.id);
}

#[test]
#[ignore]
fn search_annotates_relation() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    let _bobby = user(&mut conn, "bobby");
    friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(bob.id)).unwrap();

    let results = friend_service::search(&mut conn, alice.id, "BOB", None).unwrap();
    assert_eq!(results.len(), 2);
    let bob_hit = results.iter().find(|r| r.user.id == bob.id).unwrap();
    assert_eq!(bob_hit.relation, Some(render_api::domain::Relation::RequestSent));
    assert!(results.iter().all(|r| r.user.id != alice.id));

    assert!(friend_service::search(&mut conn, alice.id, "  ", None).unwrap().is_empty());
    // Wildcards are literal.
    assert!(friend_service::search(&mut conn, alice.id, "%", None).unwrap().is_empty());
}

#[test]
#[ignore]
fn search_keeps_prefix_matches_beyond_the_scan_window() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    // Many infix matches, inserted before the single prefix match.
    conn.batch_execute(
        "INSERT INTO users (name, email, password_hash) \
         SELECT 'zz-mal-' || g, 'zz' || g || '@example.com', 'x' FROM generate_series(1, 300) g",
    )
    .unwrap();
    let malik = user(&mut conn, "malik");

    let results = friend_service::search(&mut conn, alice.id, "mal", Some(5)).unwrap();
    assert_eq!(results.len(), 5);
    assert_eq!(results[0].user.id, malik.id);
}

#[test]
#[ignore]
fn friend_request_notifies_addressee() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    friend_service::send_request(&mut conn, alice.id, &FriendTarget::Id(bob.id)).unwrap();

    let page = notification_service::list_for_user(&mut conn, bob.id, &PaginationParams::default()).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].kind, notification_service::KIND_FRIEND_REQUEST);
    assert_eq!(notification_service::mark_all_read(&mut conn, bob.id).unwrap(), 1);
    assert_eq!(notification_service::mark_all_read(&mut conn, bob.id).unwrap(), 0);
}

// --- Images ---

#[test]
#[ignore]
fn images_are_private_to_their_owner() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    let image = image_service::create_image(&mut conn, alice.id, "cat.png", "image/png", &stored("images/a.png", 10), None)
        .unwrap();

    let err = image_service::get_result(&mut conn, image.id, bob.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::ImageNotFound);
    let err = image_service::delete_image(&mut conn, image.id, bob.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::ImageNotFound);

    assert!(image_service::list_images(&mut conn, bob.id).unwrap().is_empty());
    assert_eq!(image_service::list_images(&mut conn, alice.id).unwrap().len(), 1);
}

#[test]
#[ignore]
fn enhancement_failure_then_retry_then_chain() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let image = image_service::create_image(&mut conn, alice.id, "cat.png", "image/png", &stored("images/a.png", 10), None)
        .unwrap();
    let params = EnhanceParams::default();

    let failure = AppError::new(ErrorCode::UpstreamUnavailable, "enhancer timed out");
    image_service::record_failure(&mut conn, image.id, &params, &failure).unwrap();
    let view = image_service::get_result(&mut conn, image.id, alice.id).unwrap();
    assert_eq!(view.status, ImageStatus::Error.as_str());
    assert_eq!(view.metadata.as_ref().unwrap()["error_code"], "E4007");

    // A failed image is retried in place.
    assert!(matches!(
        image_service::prepare_enhancement(&mut conn, image.id, alice.id).unwrap(),
        EnhancementSource::Direct(_)
    ));

    let report = EnhancementReport {
        processing_time_secs: Some(1.5),
        model_used: Some("realesrgan-x4plus".into()),
        scale_factor: Some(4),
        ..EnhancementReport::default()
    };
    let view = image_service::record_success(&mut conn, image.id, &stored("enhanced/b.png", 40), &params, &report)
        .unwrap();
    assert_eq!(view.status, "processed");
    let result = view.result.unwrap();
    assert_eq!(result.url, "/uploads/enhanced/b.png");
    assert_eq!(result.metadata["scale_factor"], 4);
    assert_eq!(result.metadata["output_bytes"], 40);

    // Processed is terminal.
    let again = image_service::record_success(&mut conn, image.id, &stored("enhanced/c.png", 40), &params, &report)
        .unwrap_err();
    assert_eq!(code(again), ErrorCode::ImageAlreadyProcessed);
    image_service::record_failure(&mut conn, image.id, &params, &failure).unwrap();
    let view = image_service::get_result(&mut conn, image.id, alice.id).unwrap();
    assert_eq!(view.status, "processed");

    // Enhancing it again works on a chained copy.
    match image_service::prepare_enhancement(&mut conn, image.id, alice.id).unwrap() {
        EnhancementSource::Chain { parent, result_path } => {
            assert_eq!(parent.id, image.id);
            assert_eq!(result_path, "/uploads/enhanced/b.png");
            let child = image_service::create_chained_image(&mut conn, &parent, &stored("images/d.png", 40)).unwrap();
            assert_eq!(child.source_image_id, Some(image.id));
            assert_eq!(child.status, "pending");
        }
        other => panic!("expected a chain, got {other:?}"),
    }
}

#[test]
#[ignore]
fn delete_returns_every_file_path() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let image = image_service::create_image(&mut conn, alice.id, "cat.png", "image/png", &stored("images/a.png", 10), None)
        .unwrap();
    image_service::record_success(
        &mut conn,
        image.id,
        &stored("enhanced/b.png", 20),
        &EnhanceParams::default(),
        &EnhancementReport::default(),
    )
    .unwrap();

    let mut paths = image_service::delete_image(&mut conn, image.id, alice.id).unwrap();
    paths.sort();
    assert_eq!(paths, vec!["/uploads/enhanced/b.png".to_string(), "/uploads/images/a.png".to_string()]);
    assert!(image_service::list_images(&mut conn, alice.id).unwrap().is_empty());
}

// --- Admin workflow ---

#[test]
#[ignore]
fn admin_request_approval_promotes() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let root = user(&mut conn, "root");

    let err = admin_service::create_request(&mut conn, alice.id, UserRole::User, "   ").unwrap_err();
    assert_eq!(code(err), ErrorCode::ReasonRequired);

    let request = admin_service::create_request(&mut conn, alice.id, UserRole::User, "I run the forum").unwrap();
    let dup = admin_service::create_request(&mut conn, alice.id, UserRole::User, "again").unwrap_err();
    assert_eq!(code(dup), ErrorCode::AdminRequestPending);
    assert_eq!(admin_service::list_pending(&mut conn).unwrap().len(), 1);

    let decision = admin_service::decide(&mut conn, request.id, root.id, true).unwrap();
    assert_eq!(decision.user_role, UserRole::Admin);
    assert_eq!(decision.request.status, "approved");
    assert_eq!(decision.request.reviewer_id, Some(root.id));

    let again = admin_service::decide(&mut conn, request.id, root.id, false).unwrap_err();
    assert_eq!(code(again), ErrorCode::AdminRequestDecided);
    assert!(admin_service::list_pending(&mut conn).unwrap().is_empty());

    let admins = admin_service::list_admins(&mut conn).unwrap();
    assert!(admins.iter().any(|a| a.id == alice.id));
}

#[test]
#[ignore]
fn rejected_request_leaves_role_alone() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let root = user(&mut conn, "root");
    let request = admin_service::create_request(&mut conn, alice.id, UserRole::User, "please").unwrap();
    let decision = admin_service::decide(&mut conn, request.id, root.id, false).unwrap();
    assert_eq!(decision.user_role, UserRole::User);

    // A decided request no longer blocks a new one.
    admin_service::create_request(&mut conn, alice.id, UserRole::User, "please, again").unwrap();
}

#[test]
#[ignore]
fn demotion_respects_protected_account() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let boss = user(&mut conn, "boss");
    for u in [&alice, &boss] {
        let r = admin_service::create_request(&mut conn, u.id, UserRole::User, "help").unwrap();
        admin_service::decide(&mut conn, r.id, u.id, true).unwrap();
    }

    let err = admin_service::demote(&mut conn, boss.id, alice.id, "boss@example.com").unwrap_err();
    assert_eq!(code(err), ErrorCode::ProtectedAccount);

    let outcome = admin_service::demote(&mut conn, alice.id, boss.id, "boss@example.com").unwrap();
    assert_eq!(outcome.role, UserRole::User);
    assert!(outcome.notified);

    let err = admin_service::demote(&mut conn, alice.id, boss.id, "boss@example.com").unwrap_err();
    assert_eq!(code(err), ErrorCode::NotAnAdmin);
    let err = admin_service::demote(&mut conn, Uuid::new_v4(), boss.id, "boss@example.com").unwrap_err();
    assert_eq!(code(err), ErrorCode::NotAnAdmin);
}

// --- Chat ---

#[test]
#[ignore]
fn conversation_requires_friendship_and_is_canonical() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");

    let err = chat_service::get_or_create(&mut conn, alice.id, bob.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::NotFriends);

    befriend(&mut conn, &alice, &bob);
    let first = chat_service::get_or_create(&mut conn, alice.id, bob.id).unwrap();
    let second = chat_service::get_or_create(&mut conn, bob.id, alice.id).unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.user_a_id < first.user_b_id);
}

#[test]
#[ignore]
fn unread_counts_and_read_marking() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    let carol = user(&mut conn, "carol");
    befriend(&mut conn, &alice, &bob);
    let conv = chat_service::get_or_create(&mut conn, alice.id, bob.id).unwrap();

    for text in ["hi", "are you there?"] {
        chat_service::post_message(&mut conn, &conv, NewMessage::text(conv.id, alice.id, text)).unwrap();
    }
    chat_service::post_message(&mut conn, &conv, NewMessage::text(conv.id, bob.id, "yes")).unwrap();

    let outsider = chat_service::post_message(&mut conn, &conv, NewMessage::text(conv.id, carol.id, "hey"));
    assert_eq!(code(outsider.unwrap_err()), ErrorCode::NotConversationMember);
    let err = chat_service::list_messages(&mut conn, conv.id, carol.id).unwrap_err();
    assert_eq!(code(err), ErrorCode::NotConversationMember);

    let bobs = chat_service::list_conversations(&mut conn, bob.id).unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].unread_count, 2);
    assert_eq!(bobs[0].peer.id, alice.id);
    let last = bobs[0].last_message.as_ref().unwrap();
    assert_eq!(last.content, "yes");
    assert!(last.is_own);

    let receipt = chat_service::mark_read(&mut conn, conv.id, bob.id).unwrap();
    assert_eq!(receipt.marked, 2);
    let again = chat_service::mark_read(&mut conn, conv.id, bob.id).unwrap();
    assert_eq!(again.marked, 0);
    assert_eq!(chat_service::list_conversations(&mut conn, bob.id).unwrap()[0].unread_count, 0);
    // Bob's own message is still unread for Alice.
    assert_eq!(chat_service::list_conversations(&mut conn, alice.id).unwrap()[0].unread_count, 1);

    let history = chat_service::list_messages(&mut conn, conv.id, alice.id).unwrap();
    let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(texts, vec!["hi", "are you there?", "yes"]);
}

#[test]
#[ignore]
fn reactions_replace_and_remove() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    let carol = user(&mut conn, "carol");
    befriend(&mut conn, &alice, &bob);
    let conv = chat_service::get_or_create(&mut conn, alice.id, bob.id).unwrap();
    let msg = chat_service::post_message(&mut conn, &conv, NewMessage::text(conv.id, alice.id, "photo time")).unwrap();

    chat_service::react(&mut conn, msg.id, bob.id, "👍").unwrap();
    let (_, reaction) = chat_service::react(&mut conn, msg.id, bob.id, "❤️").unwrap();
    assert_eq!(reaction.emoji, "❤️");

    let history = chat_service::list_messages(&mut conn, conv.id, alice.id).unwrap();
    assert_eq!(history[0].reactions.len(), 1);
    assert_eq!(history[0].reactions[0].emoji, "❤️");

    let err = chat_service::react(&mut conn, msg.id, carol.id, "👍").unwrap_err();
    assert_eq!(code(err), ErrorCode::NotConversationMember);
    let err = chat_service::react(&mut conn, Uuid::new_v4(), bob.id, "👍").unwrap_err();
    assert_eq!(code(err), ErrorCode::MessageNotFound);
    let err = chat_service::react(&mut conn, msg.id, bob.id, "not an emoji at all").unwrap_err();
    assert_eq!(code(err), ErrorCode::InvalidEmoji);

    assert!(chat_service::unreact(&mut conn, msg.id, bob.id).unwrap().1);
    assert!(!chat_service::unreact(&mut conn, msg.id, bob.id).unwrap().1);
}

#[test]
#[ignore]
fn image_message_has_fixed_preview() {
    let mut conn = conn();
    let alice = user(&mut conn, "alice");
    let bob = user(&mut conn, "bob");
    befriend(&mut conn, &alice, &bob);
    let conv = chat_service::get_or_create(&mut conn, alice.id, bob.id).unwrap();

    let msg = chat_service::post_message(
        &mut conn,
        &conv,
        NewMessage::image(conv.id, alice.id, "/uploads/chat/x.gif".into()),
    )
    .unwrap();
    assert_eq!(msg.kind, "image");
    assert_eq!(msg.content, "Image");
    assert_eq!(msg.file_url.as_deref(), Some("/uploads/chat/x.gif"));
}
