//! Two sessions talking through a real server on a loopback port.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, timeout};
use uuid::Uuid;

use parley_client::{ChatSession, ClientConfig, ConnectionState, RestClient, TransportEvent};
use parley_db::Database;
use parley_gateway::Gateway;
use parley_types::models::MessageStatus;

const SECRET: &str = "end-to-end-secret";

type Session = ChatSession<RestClient>;

async fn start_server(db: Arc<Database>) -> String {
    let gateway = Gateway::new(db.clone());
    let app = parley_server::app(db, gateway, SECRET.to_string(), None).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn login(base: &str, user_id: Uuid, handle: &str) -> (Session, UnboundedReceiver<TransportEvent>) {
    let token = parley_api::create_token(SECRET, user_id, handle).unwrap();
    let config = ClientConfig::for_server(base);
    let (mut session, mut events) = ChatSession::connect(&config, &token, user_id).unwrap();
    pump_until(&mut session, &mut events, |s| {
        s.connection_state() == ConnectionState::Connected
    })
    .await;
    session.initialize().await.unwrap();
    (session, events)
}

/// Feed transport events into `session` until `done` holds.
async fn pump_until<F>(session: &mut Session, events: &mut UnboundedReceiver<TransportEvent>, mut done: F)
where
    F: FnMut(&Session) -> bool,
{
    timeout(Duration::from_secs(5), async {
        while !done(&*session) {
            let event = events.recv().await.expect("transport closed");
            session.on_transport(event, Instant::now());
        }
    })
    .await
    .expect("timed out waiting for gateway");
}

fn has_message(session: &Session, content: &str) -> bool {
    session.messages().iter().any(|m| m.content == content)
}

#[tokio::test]
async fn message_and_read_receipt_round_trip() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let alice_id = Uuid::new_v4();
    let bob_id = Uuid::new_v4();
    db.create_user(alice_id, "Alice", "alice").unwrap();
    db.create_user(bob_id, "Bob", "bob").unwrap();
    let base = start_server(db).await;

    let (mut alice, mut alice_events) = login(&base, alice_id, "alice").await;
    let (mut bob, mut bob_events) = login(&base, bob_id, "bob").await;

    let conversation = alice.start_new_chat(bob_id).await.unwrap();
    assert!(!alice.is_placeholder(conversation));

    // Each side waits for its own echo, which proves its join was processed.
    alice.send("hi bob").unwrap();
    pump_until(&mut alice, &mut alice_events, |s| has_message(s, "hi bob")).await;

    bob.initialize().await.unwrap();
    bob.select_conversation(conversation).await.unwrap();
    assert!(has_message(&bob, "hi bob"));
    assert_eq!(bob.unread(conversation), 1);

    bob.send("hi alice").unwrap();
    pump_until(&mut bob, &mut bob_events, |s| has_message(s, "hi alice")).await;
    pump_until(&mut alice, &mut alice_events, |s| has_message(s, "hi alice")).await;
    assert_eq!(alice.unread(conversation), 1);

    let from_bob: Vec<Uuid> = alice
        .messages()
        .iter()
        .filter(|m| m.sender_id == bob_id)
        .map(|m| m.id)
        .collect();
    alice.mark_as_read(from_bob.clone()).await.unwrap();
    assert_eq!(alice.unread(conversation), 0);

    pump_until(&mut bob, &mut bob_events, |s| {
        s.messages()
            .iter()
            .any(|m| from_bob.contains(&m.id) && m.status == MessageStatus::Read)
    })
    .await;
    let read = bob.messages().iter().find(|m| m.id == from_bob[0]).unwrap();
    assert!(read.is_read_by(alice_id));
}

#[tokio::test]
async fn bad_token_is_final() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let base = start_server(db).await;

    let config = ClientConfig::for_server(&base);
    let (mut session, mut events) =
        ChatSession::connect(&config, "not-a-token", Uuid::new_v4()).unwrap();

    let event = timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(&event, TransportEvent::Disconnected { reason } if reason == "unauthorized"));
    session.on_transport(event, Instant::now());
    assert_eq!(session.connection_state(), ConnectionState::Disconnected);
    assert!(events.recv().await.is_none());
}
