//! HTTP tests for the user-scoped management API and the admin routes.

use std::sync::Arc;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    response::Response,
};
use barid::crypto::{encrypt_token, is_encrypted_payload};
use barid::instagram::{ConnectedAccount, LongLivedToken};
use barid::models::integration;
use barid::server::create_app;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;

use test_utils::{
    AgentBehavior, FakeAgent, FakeInstagram, OPERATOR_TOKEN, app_state, insert_integration,
    integration_repo, message_repo, setup_test_db, test_config, test_crypto_key,
};

fn app_with(db: &DatabaseConnection, instagram: FakeInstagram) -> Router {
    create_app(app_state(
        test_config(),
        db,
        Arc::new(FakeAgent::new(AgentBehavior::Text("unused".to_string()))),
        Arc::new(instagram),
    ))
}

fn app(db: &DatabaseConnection) -> Router {
    app_with(db, FakeInstagram::default())
}

fn user_request(method: &str, uri: &str, user: &Uuid, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", OPERATOR_TOKEN))
        .header("x-user-id", user.to_string());
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

fn operator_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("authorization", format!("Bearer {}", OPERATOR_TOKEN))
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn requests_without_credentials_are_rejected() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();

    let response = app(&db)
        .oneshot(Request::builder().uri("/integrations").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&db)
        .oneshot(
            Request::builder()
                .uri("/integrations")
                .header("authorization", format!("Bearer {}", OPERATOR_TOKEN))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&db)
        .oneshot(
            Request::builder()
                .uri("/integrations")
                .header("authorization", "Bearer wrong")
                .header("x-user-id", user.to_string())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn integration_create_list_delete() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();

    let response = app(&db)
        .oneshot(user_request(
            "POST",
            "/integrations",
            &user,
            Some(json!({
                "instagramId": "17841400000000003",
                "pageId": "1029384756",
                "name": "Corner Bakery",
                "token": "  IGQVJ-created \n",
                "expiresAt": "2030-01-01T00:00:00Z"
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["token"], "IGQVJ-created");
    assert_eq!(created["instagramId"], "17841400000000003");
    assert_eq!(created["pageId"], "1029384756");
    assert_eq!(created["name"], "Corner Bakery");
    assert_eq!(created["userId"], user.to_string());

    let response = app(&db)
        .oneshot(user_request("GET", "/integrations", &user, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let listed = body_json(response).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], created["id"]);

    // Other users see nothing and cannot delete it.
    let stranger = Uuid::new_v4();
    let response = app(&db)
        .oneshot(user_request("GET", "/integrations", &stranger, None))
        .await
        .unwrap();
    assert_eq!(body_json(response).await, json!([]));

    let uri = format!("/integrations/{}", created["id"].as_str().unwrap());
    let response = app(&db)
        .oneshot(user_request("DELETE", &uri, &stranger, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&db)
        .oneshot(user_request("DELETE", &uri, &user, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn duplicate_integration_is_a_conflict() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();
    let body = json!({ "instagramId": "dup-account", "token": "t1" });

    let first = app(&db)
        .oneshot(user_request("POST", "/integrations", &user, Some(body.clone())))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app(&db)
        .oneshot(user_request("POST", "/integrations", &user, Some(body)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "CONFLICT");
}

#[tokio::test]
async fn integration_validation_errors() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();

    let response = app(&db)
        .oneshot(user_request(
            "POST",
            "/integrations",
            &user,
            Some(json!({ "instagramId": " ", "token": "   " })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_FAILED");
    assert!(json["details"]["token"].is_string());
    assert!(json["details"]["instagramId"].is_string());

    let response = app(&db)
        .oneshot(user_request("POST", "/integrations", &user, Some(json!({ "token": "x" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn refresh_endpoint_maps_outcomes() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();
    let good = insert_integration(&db, user, "acct-good", "tok-good", None).await.unwrap();
    let bad = insert_integration(&db, user, "acct-bad", "tok-bad", None).await.unwrap();
    let instagram = FakeInstagram::with_failing_tokens(["tok-bad"]);
    let router = app_with(&db, instagram);

    let response = router
        .clone()
        .oneshot(user_request(
            "POST",
            &format!("/integrations/instagram/refresh/{}", good.id),
            &user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["id"], good.id.to_string());
    assert!(json["expiresAt"].is_string());

    let response = router
        .clone()
        .oneshot(user_request(
            "POST",
            &format!("/integrations/instagram/refresh/{}", bad.id),
            &user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = body_json(response).await;
    assert_eq!(json["code"], "PROVIDER_ERROR");

    let response = router
        .oneshot(user_request(
            "POST",
            &format!("/integrations/instagram/refresh/{}", Uuid::new_v4()),
            &user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oauth_exchange_creates_then_updates() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();
    let account = ConnectedAccount {
        account_id: "9988776655".to_string(),
        user_id: Some("17841400000000009".to_string()),
        username: Some("corner.bakery".to_string()),
        token: LongLivedToken {
            access_token: "IGQVJ-long-lived".to_string(),
            token_type: Some("bearer".to_string()),
            expires_in: 5_184_000,
        },
    };
    let instagram = FakeInstagram {
        exchange_account: Some(account),
        ..Default::default()
    };
    let router = app_with(&db, instagram);

    let response = router
        .clone()
        .oneshot(user_request(
            "POST",
            "/integrations/instagram/oauth/exchange",
            &user,
            Some(json!({ "code": "AQD-code" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["instagramId"], "17841400000000009");
    assert_eq!(json["pageId"], "9988776655");
    assert_eq!(json["name"], "corner.bakery");
    assert_eq!(json["token"], "IGQVJ-long-lived");

    let response = router
        .oneshot(user_request(
            "POST",
            "/integrations/instagram/oauth/exchange",
            &user,
            Some(json!({ "code": "AQD-code-2" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(integration_repo(&db).list_by_owner(&user).await.unwrap().len(), 1);
}

#[tokio::test]
async fn oauth_exchange_without_credentials_is_unavailable() {
    let db = setup_test_db().await.unwrap();
    let response = app(&db)
        .oneshot(user_request(
            "POST",
            "/integrations/instagram/oauth/exchange",
            &Uuid::new_v4(),
            Some(json!({ "code": "AQD" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn automation_lifecycle_and_messages() {
    let db = setup_test_db().await.unwrap();
    let user = Uuid::new_v4();

    let response = app(&db)
        .oneshot(user_request(
            "POST",
            "/automations",
            &user,
            Some(json!({ "name": "Support replies" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["active"], true);
    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

    let response = app(&db)
        .oneshot(user_request(
            "PATCH",
            &format!("/automations/{}", id),
            &user,
            Some(json!({ "active": false })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated = body_json(response).await;
    assert_eq!(updated["active"], false);
    assert_eq!(updated["name"], "Support replies");

    let response = app(&db)
        .oneshot(user_request(
            "PATCH",
            &format!("/automations/{}", id),
            &user,
            Some(json!({ "name": "" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    for (sender, receiver, direction) in [
        ("customer", "account", barid::models::message::MessageDirection::Inbound),
        ("account", "customer", barid::models::message::MessageDirection::Outbound),
    ] {
        message_repo(&db)
            .record(barid::repositories::NewMessage {
                automation_id: id,
                sender_id: sender.to_string(),
                receiver_id: receiver.to_string(),
                text: format!("from {}", sender),
                direction,
                platform_message_id: None,
            })
            .await
            .unwrap();
    }

    let response = app(&db)
        .oneshot(user_request("GET", &format!("/automations/{}/messages", id), &user, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let messages = body_json(response).await;
    assert_eq!(messages.as_array().unwrap().len(), 2);
    assert_eq!(messages[0]["direction"], "inbound");
    assert_eq!(messages[1]["direction"], "outbound");

    let response = app(&db)
        .oneshot(user_request(
            "GET",
            &format!("/automations/{}/messages?limit=1", id),
            &user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(body_json(response).await.as_array().unwrap().len(), 1);

    let response = app(&db)
        .oneshot(user_request(
            "GET",
            &format!("/automations/{}/messages?limit=0", id),
            &user,
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&db)
        .oneshot(user_request("GET", &format!("/automations/{}/messages", id), &Uuid::new_v4(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app(&db)
        .oneshot(user_request("DELETE", &format!("/automations/{}", id), &user, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(test_utils::count_messages(&db).await, 0);
}

#[tokio::test]
async fn sanitize_tokens_is_idempotent() {
    let db = setup_test_db().await.unwrap();
    let key = test_crypto_key();
    let owner = Uuid::new_v4();

    // Encrypted but padded with whitespace, as older writes stored it.
    let padded = insert_integration(&db, owner, "acct-padded", "placeholder", None)
        .await
        .unwrap();
    let mut active: integration::ActiveModel = padded.clone().into();
    active.access_token_ciphertext =
        Set(encrypt_token(&key, &padded.token_aad(), " IGQVJ-padded\n").unwrap());
    active.update(&db).await.unwrap();

    // Legacy plaintext row.
    let legacy = insert_integration(&db, owner, "acct-legacy", "placeholder", None)
        .await
        .unwrap();
    let mut active: integration::ActiveModel = legacy.clone().into();
    active.access_token_ciphertext = Set(b"IGQVJ-plain".to_vec());
    active.update(&db).await.unwrap();

    insert_integration(&db, owner, "acct-clean", "IGQVJ-clean", None)
        .await
        .unwrap();

    let response = app(&db)
        .oneshot(operator_request("/admin/integrations/sanitize-tokens"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let first = body_json(response).await;
    assert_eq!(first["scanned"], 3);
    assert_eq!(first["changed"], 2);
    assert_eq!(first["reencrypted"], 1);

    let repo = integration_repo(&db);
    let stored = integration::Entity::find_by_id(legacy.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert!(is_encrypted_payload(&stored.access_token_ciphertext));
    assert_eq!(repo.decrypt_token(&stored).unwrap(), "IGQVJ-plain");
    let stored = integration::Entity::find_by_id(padded.id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(repo.decrypt_token(&stored).unwrap(), "IGQVJ-padded");

    let response = app(&db)
        .oneshot(operator_request("/admin/integrations/sanitize-tokens"))
        .await
        .unwrap();
    let second = body_json(response).await;
    assert_eq!(second["changed"], 0);
}

#[tokio::test]
async fn admin_token_refresh_run_returns_summary() {
    let db = setup_test_db().await.unwrap();
    insert_integration(
        &db,
        Uuid::new_v4(),
        "acct",
        "tok",
        Some(chrono::Utc::now() + chrono::Duration::hours(1)),
    )
    .await
    .unwrap();

    let response = app(&db)
        .oneshot(operator_request("/admin/token-refresh/run"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json, json!({ "scanned": 1, "eligible": 1, "refreshed": 1, "failed": 0 }));

    let response = app(&db)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/token-refresh/run")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_and_root_are_public() {
    let db = setup_test_db().await.unwrap();
    let response = app(&db)
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let response = app(&db)
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(body_json(response).await["service"], "barid");

    let response = app(&db)
        .oneshot(Request::builder().uri("/openapi.json").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
