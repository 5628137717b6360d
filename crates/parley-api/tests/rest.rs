use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use parley_api::{AppStateInner, create_token, router};
use parley_db::Database;
use parley_gateway::Gateway;
use parley_types::events::GatewayEvent;

const SECRET: &str = "rest-test-secret";

struct TestApp {
    app: Router,
    db: Arc<Database>,
    gateway: Gateway,
    alice: Uuid,
    bob: Uuid,
    carol: Uuid,
}

fn test_app() -> TestApp {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let carol = Uuid::new_v4();
    db.create_user(alice, "Alice", "alice").unwrap();
    db.create_user(bob, "Bob", "bob").unwrap();
    db.create_user(carol, "Carol", "carol").unwrap();

    let gateway = Gateway::new(db.clone());
    let state = Arc::new(AppStateInner {
        db: db.clone(),
        gateway: gateway.clone(),
        jwt_secret: SECRET.into(),
    });

    TestApp {
        app: router(state),
        db,
        gateway,
        alice,
        bob,
        carol,
    }
}

fn bearer(user: Uuid) -> String {
    format!("Bearer {}", create_token(SECRET, user, "someone").unwrap())
}

async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str, user: Uuid) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, bearer(user))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, user: Uuid, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::AUTHORIZATION, bearer(user))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn direct_conversation(t: &TestApp) -> Uuid {
    let (status, body) = call(
        &t.app,
        post("/conversations", t.alice, json!({ "participantIds": [t.bob] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn missing_authorization_is_unauthorized() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;

    let req = Request::get(format!("/conversations/{conversation}/messages"))
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&t.app, req).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn invalid_token_is_unauthorized() {
    let t = test_app();
    let req = Request::get("/conversations")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&t.app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn direct_conversation_is_reused() {
    let t = test_app();
    let first = direct_conversation(&t).await;

    let (status, body) = call(
        &t.app,
        post("/conversations", t.bob, json!({ "participantIds": [t.alice] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!(first));
    assert_eq!(body["lastMessage"], Value::Null);
}

#[tokio::test]
async fn create_conversation_validates_participants() {
    let t = test_app();

    let (status, _) = call(&t.app, post("/conversations", t.alice, json!({ "participantIds": [] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&t.app, post("/conversations", t.alice, json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        post("/conversations", t.alice, json!({ "participantIds": [Uuid::new_v4()] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        Request::post("/conversations")
            .header(header::AUTHORIZATION, bearer(t.alice))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn group_conversation_records_admin() {
    let t = test_app();
    let (status, body) = call(
        &t.app,
        post(
            "/conversations",
            t.alice,
            json!({ "participantIds": [t.bob, t.carol], "groupName": "Trio" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["group"]["name"], "Trio");
    assert_eq!(body["group"]["adminId"], json!(t.alice));
    assert_eq!(body["participants"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn send_and_fetch_messages() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;
    let uri = format!("/conversations/{conversation}/messages");

    for text in ["one", "two", "three"] {
        let (status, body) = call(
            &t.app,
            post(&uri, t.alice, json!({ "content": text, "sender": t.alice })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "sent");
        assert_eq!(body["readBy"], json!([t.alice]));
    }

    let (status, body) = call(&t.app, get(&uri, t.bob)).await;
    assert_eq!(status, StatusCode::OK);
    let contents: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["content"].as_str().unwrap())
        .collect();
    assert_eq!(contents, vec!["one", "two", "three"]);

    let (_, body) = call(&t.app, get(&format!("{uri}?limit=2"), t.bob)).await;
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["content"], "two");

    let oldest_loaded = body[0]["id"].as_str().unwrap().to_string();
    let (status, older) = call(
        &t.app,
        get(&format!("{uri}?limit=2&beforeId={oldest_loaded}"), t.bob),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(older.as_array().unwrap().len(), 1);
    assert_eq!(older[0]["content"], "one");

    let (_, list) = call(&t.app, get("/conversations", t.bob)).await;
    assert_eq!(list[0]["lastMessage"]["content"], "three");
}

#[tokio::test]
async fn send_message_checks_body_and_sender() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;
    let uri = format!("/conversations/{conversation}/messages");

    let (status, _) = call(&t.app, post(&uri, t.alice, json!({ "sender": t.alice }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&t.app, post(&uri, t.alice, json!({ "content": "hi" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        post(&uri, t.alice, json!({ "content": "spoof", "sender": t.bob })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(
        &t.app,
        post(&uri, t.carol, json!({ "content": "intrude", "sender": t.carol })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn non_participant_cannot_read_history() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;
    let (status, body) = call(
        &t.app,
        get(&format!("/conversations/{conversation}/messages"), t.carol),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, Value::Null);
}

#[tokio::test]
async fn rest_send_is_published_to_the_room() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;

    let (session, mut rx) = t.gateway.connect(t.bob).await;
    t.gateway.join_conversation(&session, conversation).await.unwrap();
    while rx.try_recv().is_ok() {}

    let (status, _) = call(
        &t.app,
        post(
            &format!("/conversations/{conversation}/messages"),
            t.alice,
            json!({ "content": "over rest", "sender": t.alice }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    match rx.try_recv().unwrap() {
        GatewayEvent::MessageNew(message) => assert_eq!(message.content, "over rest"),
        other => panic!("expected message:new, got {other:?}"),
    }
}

#[tokio::test]
async fn mark_read_only_touches_others_messages_in_conversation() {
    let t = test_app();
    let conversation = direct_conversation(&t).await;
    let uri = format!("/conversations/{conversation}/messages");

    let (_, from_alice) = call(&t.app, post(&uri, t.alice, json!({ "content": "a", "sender": t.alice }))).await;
    let (_, from_bob) = call(&t.app, post(&uri, t.bob, json!({ "content": "b", "sender": t.bob }))).await;
    let alice_msg: Uuid = from_alice["id"].as_str().unwrap().parse().unwrap();
    let bob_msg: Uuid = from_bob["id"].as_str().unwrap().parse().unwrap();

    let (status, body) = call(
        &t.app,
        post(
            &format!("{uri}/read"),
            t.bob,
            json!({ "messageIds": [alice_msg, bob_msg] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let alice_msg = t.db.get_message(alice_msg).unwrap().unwrap();
    assert!(alice_msg.is_read_by(t.bob));
    assert_eq!(alice_msg.status.as_str(), "read");

    let bob_msg = t.db.get_message(bob_msg).unwrap().unwrap();
    assert_eq!(bob_msg.status.as_str(), "sent");

    let (status, _) = call(&t.app, post(&format!("{uri}/read"), t.bob, json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        post(&format!("{uri}/read"), t.carol, json!({ "messageIds": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
