use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::create_router;
use crate::test_utils::TestEnvironment;

async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header(super::USER_ID_HEADER, user);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_requests_without_user_are_unauthorized() {
    let env = TestEnvironment::new().await;
    let app = create_router(env.state.clone());

    let (status, _) = call(&app, "GET", "/api/children", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_and_login_endpoints() {
    let env = TestEnvironment::new().await;
    let app = create_router(env.state.clone());

    let registration = json!({"user_id": "alice", "password": "secret", "display_name": "Alice"});
    let (status, body) = call(&app, "POST", "/api/users/register", None, Some(registration.clone())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);

    let (status, body) = call(&app, "POST", "/api/users/register", None, Some(registration)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(
        &app,
        "POST",
        "/api/users/login",
        None,
        Some(json!({"user_id": "alice", "password": "secret"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["display_name"], "Alice");

    let (status, _) = call(
        &app,
        "POST",
        "/api/users/login",
        None,
        Some(json!({"user_id": "alice", "password": "nope"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_child_and_log_endpoints() {
    let env = TestEnvironment::new().await;
    let app = create_router(env.state.clone());

    let (status, body) = call(
        &app,
        "POST",
        "/api/children",
        Some("alice"),
        Some(json!({"name": "Mina", "birth_date": "2024-01-15"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let child_id = body["child"]["id"].as_str().unwrap().to_string();

    let (status, body) = call(&app, "GET", "/api/children", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["children"].as_array().unwrap().len(), 1);
    assert_eq!(body["selected_child_id"], child_id.as_str());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/children/{}/logs", child_id),
        Some("alice"),
        Some(json!({"text": "Laughed at the dog"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(&app, "GET", &format!("/api/children/{}/logs/timeline", child_id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["logs"][0]["text"], "Laughed at the dog");

    let (status, _) = call(&app, "GET", &format!("/api/children/{}", child_id), Some("mallory"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "DELETE", &format!("/api/children/{}", child_id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&app, "GET", &format!("/api/children/{}", child_id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_record_endpoints() {
    let env = TestEnvironment::new().await;
    let child = env.register_child("alice", "Mina").await;
    let app = create_router(env.state.clone());
    let base = format!("/api/children/{}/health", child.id);

    let (status, body) = call(
        &app,
        "POST",
        &base,
        Some("alice"),
        Some(json!({"category": "allergy", "details": {"allergen": "peanut", "severity": "mild"}})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let record_id = body[0]["id"].as_str().unwrap().to_string();

    call(
        &app,
        "POST",
        &base,
        Some("alice"),
        Some(json!({"category": "supplement", "details": {"name": "Vitamin D"}})),
    )
    .await;

    let (status, body) = call(&app, "GET", &format!("{}?category=allergy", base), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    let (status, body) = call(
        &app,
        "PUT",
        &format!("{}/{}", base, record_id),
        Some("alice"),
        Some(json!({"severity": "severe"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let updated = body
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == record_id.as_str())
        .unwrap();
    assert_eq!(updated["severity"], "severe");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("{}/missing", base),
        Some("alice"),
        Some(json!({"severity": "severe"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checklist_and_vaccination_endpoints() {
    let env = TestEnvironment::new().await;
    let child = env.register_child("alice", "Mina").await;
    let app = create_router(env.state.clone());

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/children/{}/checklist", child.id),
        Some("alice"),
        Some(json!({"item_id": "m2_smile", "checked": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["m2_smile"], true);

    let (status, body) = call(
        &app,
        "POST",
        &format!("/api/children/{}/vaccinations", child.id),
        Some("alice"),
        Some(json!({"vaccine_id": "hepb", "dose": 1, "completed": true, "completed_date": "2024-01-16"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hepb_1"]["completed"], true);
}

#[tokio::test]
async fn test_family_and_sync_endpoints() {
    let alice = TestEnvironment::new().await;
    let child = alice.register_child("alice", "Mina").await;
    let alice_app = create_router(alice.state.clone());

    let (status, body) = call(&alice_app, "GET", &format!("/api/children/{}/family", child.id), Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    let code = body["invite_code"].as_str().unwrap().to_string();

    let (status, body) = call(&alice_app, "POST", "/api/sync", Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(&alice_app, "GET", "/api/sync/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pending_mutations"], 0);

    let bob = alice.second_device();
    let bob_app = create_router(bob.state.clone());
    let (status, body) = call(
        &bob_app,
        "POST",
        "/api/family/join",
        Some("bob"),
        Some(json!({"invite_code": code})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, body) = call(&bob_app, "GET", "/api/children", Some("bob"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["children"][0]["name"], "Mina");

    let (status, body) = call(
        &bob_app,
        "POST",
        "/api/family/join",
        Some("bob"),
        Some(json!({"invite_code": "ZZZZZZ"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid invite code");
}

#[tokio::test]
async fn test_notification_endpoints() {
    let env = TestEnvironment::new().await;
    let app = create_router(env.state.clone());
    let child = env.register_child("alice", "Mina").await;

    env.state
        .store
        .append::<crate::storage::collections::Logs, _>(shared::ObservationLog {
            id: shared::RecordId::default(),
            child_id: child.id.clone(),
            text: "Waved bye".to_string(),
            ai_analysis: None,
            created_at: chrono::Utc::now().to_rfc3339(),
            age_at_record: shared::AgeAtRecord::default(),
            author_id: Some("bob".to_string()),
            author_name: Some("Bob".to_string()),
        })
        .await
        .unwrap();

    let uri = format!("/api/children/{}/notifications", child.id);
    let (status, body) = call(&app, "GET", &uri, Some("alice"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unread_count"], 1);
    assert_eq!(body["notifications"][0]["sender_name"], "Bob");
    assert_eq!(body["notifications"][0]["preview"], "Waved bye");

    let (status, _) = call(&app, "POST", "/api/notifications/read", Some("alice"), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = call(&app, "GET", &uri, Some("alice"), None).await;
    assert_eq!(body["unread_count"], 0);
}
