//! HTTP tests for the public Instagram webhook routes.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
};
use barid::config::AppConfig;
use barid::instagram::webhook::{SIGNATURE_HEADER, sign_payload, text_message_payload};
use barid::server::create_app;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    AgentBehavior, FakeAgent, FakeInstagram, app_state, automation_repo, count_messages,
    insert_integration, setup_test_db, test_config,
};

const ACCOUNT_ID: &str = "17841400000000002";
const APP_SECRET: &str = "app-secret";

fn config_with_webhook() -> AppConfig {
    AppConfig {
        webhook_verify_token: Some("verify-me".to_string()),
        webhook_app_secret: Some(APP_SECRET.to_string()),
        ..test_config()
    }
}

fn app(db: &DatabaseConnection, config: AppConfig) -> Router {
    create_app(app_state(
        config,
        db,
        Arc::new(FakeAgent::new(AgentBehavior::Text("auto reply".to_string()))),
        Arc::new(FakeInstagram::default()),
    ))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn signed_post(body: Vec<u8>) -> Request<Body> {
    let signature = sign_payload(&body, APP_SECRET).unwrap();
    Request::builder()
        .method("POST")
        .uri("/webhooks/instagram")
        .header("content-type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn handshake_echoes_challenge_for_matching_token() {
    let db = setup_test_db().await.unwrap();
    let response = app(&db, config_with_webhook())
        .oneshot(
            Request::builder()
                .uri("/webhooks/instagram?hub.mode=subscribe&hub.verify_token=verify-me&hub.challenge=1158201444")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"1158201444");
}

#[tokio::test]
async fn handshake_rejects_wrong_token_or_mode() {
    let db = setup_test_db().await.unwrap();
    for uri in [
        "/webhooks/instagram?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1",
        "/webhooks/instagram?hub.mode=unsubscribe&hub.verify_token=verify-me&hub.challenge=1",
        "/webhooks/instagram",
    ] {
        let response = app(&db, config_with_webhook())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn handshake_is_forbidden_without_configured_token() {
    let db = setup_test_db().await.unwrap();
    let response = app(&db, test_config())
        .oneshot(
            Request::builder()
                .uri("/webhooks/instagram?hub.mode=subscribe&hub.verify_token=&hub.challenge=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn signed_delivery_is_processed() {
    let db = setup_test_db().await.unwrap();
    let owner = Uuid::new_v4();
    insert_integration(&db, owner, ACCOUNT_ID, "IGQVJ-token", None)
        .await
        .unwrap();
    automation_repo(&db).create(&owner, "Main", true).await.unwrap();

    let payload = text_message_payload(ACCOUNT_ID, "igsid-42", "Do you ship abroad?", "m_1");
    let response = app(&db, config_with_webhook())
        .oneshot(signed_post(serde_json::to_vec(&payload).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["events"], 1);
    assert_eq!(json["replied"], 1);
    assert_eq!(count_messages(&db).await, 2);
}

#[tokio::test]
async fn unknown_recipient_still_answers_ok() {
    let db = setup_test_db().await.unwrap();
    let payload = text_message_payload("nobody", "igsid-42", "hello", "m_2");

    let response = app(&db, config_with_webhook())
        .oneshot(signed_post(serde_json::to_vec(&payload).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["failed"], 1);
    assert_eq!(count_messages(&db).await, 0);
}

#[tokio::test]
async fn bad_signature_is_rejected() {
    let db = setup_test_db().await.unwrap();
    let body = serde_json::to_vec(&text_message_payload(ACCOUNT_ID, "s", "hi", "m")).unwrap();

    let response = app(&db, config_with_webhook())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/instagram")
                .header(SIGNATURE_HEADER, format!("sha256={}", "0".repeat(64)))
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&db, config_with_webhook())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/instagram")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}

#[tokio::test]
async fn unsigned_delivery_accepted_without_app_secret() {
    let db = setup_test_db().await.unwrap();
    let body = serde_json::to_vec(&text_message_payload(ACCOUNT_ID, "s", "hi", "m")).unwrap();

    let response = app(&db, test_config())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/instagram")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_or_foreign_payloads_are_bad_requests() {
    let db = setup_test_db().await.unwrap();

    let response = app(&db, config_with_webhook())
        .oneshot(signed_post(b"{not json".to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&db, config_with_webhook())
        .oneshot(signed_post(br#"{"object":"page","entry":[]}"#.to_vec()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_FAILED");
}
