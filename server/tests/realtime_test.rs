//! Integration tests for the realtime path: WebSocket auth, room join,
//! message fan-out, reactions, deletes, typing, and presence.

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use huddle_server::auth::jwt;
use huddle_server::chat;
use huddle_server::db::store;
use huddle_server::routes;
use huddle_server::state::AppState;

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRead = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// Start the server on a random port with a seeded in-memory DB.
/// Users: alice (creator of event 42), bob (member), carol (admin, not a
/// member), mallory (no access). Typing TTL is 1s so expiry is testable.
async fn start_test_server() -> (String, SocketAddr, Vec<u8>) {
    let db = huddle_server::db::init_db_in_memory().expect("Failed to init DB");
    {
        let conn = db.lock().unwrap();
        store::insert_user(&conn, "alice", "Alice", "member").unwrap();
        store::insert_user(&conn, "bob", "Bob", "member").unwrap();
        store::insert_user(&conn, "carol", "Carol", "admin").unwrap();
        store::insert_user(&conn, "mallory", "Mallory", "member").unwrap();
        store::insert_event(&conn, "42", "Launch Party", "alice").unwrap();
        store::add_event_member(&conn, "42", "bob").unwrap();
    }

    let jwt_secret: [u8; 32] = rand::rng().random();
    let state = AppState::new(db, jwt_secret.to_vec(), Duration::from_secs(1));

    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), addr, jwt_secret.to_vec())
}

fn token_for(secret: &[u8], user_id: &str) -> String {
    jwt::issue_access_token(secret, user_id, false).unwrap()
}

async fn connect(addr: &SocketAddr, token: &str) -> (WsWrite, WsRead) {
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

/// Next text frame as JSON, with a timeout. Skips pings/pongs.
async fn recv_frame(read: &mut WsRead) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for a frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("Frame is not JSON");
        }
    }
}

/// Keep reading until a frame matches the predicate. Lets tests ignore
/// interleaved presence/typing traffic from other clients.
async fn recv_until(read: &mut WsRead, pred: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..20 {
        let frame = recv_frame(read).await;
        if pred(&frame) {
            return frame;
        }
    }
    panic!("No matching frame within 20 frames");
}

/// Drain whatever is pending (presence snapshots and the like).
async fn drain(read: &mut WsRead) {
    while let Ok(Some(Ok(_))) = tokio::time::timeout(Duration::from_millis(200), read.next()).await
    {
    }
}

/// Assert no text frame arrives for a while.
async fn assert_silent(read: &mut WsRead) {
    while let Ok(Some(Ok(msg))) =
        tokio::time::timeout(Duration::from_millis(400), read.next()).await
    {
        if let Message::Text(text) = msg {
            panic!("Expected silence, got frame: {}", text);
        }
    }
}

async fn send_cmd(write: &mut WsWrite, cmd: Value) {
    write
        .send(Message::Text(cmd.to_string().into()))
        .await
        .expect("Failed to send command");
}

async fn join_room(write: &mut WsWrite, read: &mut WsRead, room: &str) {
    send_cmd(write, json!({"cmd": "join", "room_id": room, "id": "join"})).await;
    let ack = recv_until(read, |f| f["type"] == "ack" && f["request_id"] == "join").await;
    assert_eq!(ack["type"], "ack");
}

#[tokio::test]
async fn file_backed_data_dir_boots_and_persists_the_jwt_key() {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = huddle_server::db::init_db(&data_dir).expect("Failed to init DB");
    let secret = jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate secret");
    assert_eq!(secret.len(), 32);

    // A second load returns the same key, not a fresh one
    let reloaded = jwt::load_or_generate_jwt_secret(&data_dir).unwrap();
    assert_eq!(secret, reloaded);

    // The schema is live
    let conn = db.lock().unwrap();
    store::insert_user(&conn, "alice", "Alice", "member").unwrap();
    let (msg, created) = store::insert_message(
        &conn,
        "event:1",
        "alice",
        huddle_server::db::models::MessageKind::Text,
        "persisted",
        None,
        None,
    )
    .unwrap();
    assert!(created);
    assert_eq!(msg.room_sequence, 1);
}

#[tokio::test]
async fn invalid_token_gets_close_code_4002() {
    let (_base, addr, _secret) = start_test_server().await;

    let ws_url = format!("ws://{}/ws?token=not_a_jwt", addr);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Upgrade should succeed even with a bad token");
    let (_write, mut read) = ws_stream.split();

    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close within timeout");

    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(u16::from(frame.code), 4002, "Expected token-invalid close");
        }
        other => {
            if let Some(Ok(msg)) = other {
                assert!(msg.is_close(), "Expected close, got: {:?}", msg);
            }
        }
    }
}

#[tokio::test]
async fn message_flow_end_to_end() {
    let (_base, addr, secret) = start_test_server().await;

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    let (mut bob_w, mut bob_r) = connect(&addr, &token_for(&secret, "bob")).await;
    join_room(&mut alice_w, &mut alice_r, "event:42").await;
    join_room(&mut bob_w, &mut bob_r, "event:42").await;
    drain(&mut alice_r).await;
    drain(&mut bob_r).await;

    send_cmd(
        &mut alice_w,
        json!({"cmd": "post", "id": "req-1", "room_id": "event:42", "content": "hello room"}),
    )
    .await;

    // The posting session gets its message on the ack, not via broadcast
    let ack = recv_until(&mut alice_r, |f| f["type"] == "ack").await;
    assert_eq!(ack["request_id"], "req-1");
    assert_eq!(ack["message"]["content"], "hello room");
    assert_eq!(ack["message"]["author_id"], "alice");
    assert_eq!(ack["message"]["author_name"], "Alice");

    // Bob gets the broadcast
    let event = recv_until(&mut bob_r, |f| f["type"] == "message.created").await;
    assert_eq!(event["room_id"], "event:42");
    assert_eq!(event["message"]["content"], "hello room");
    assert_eq!(event["message"]["room_sequence"], 1);

    // Alice disconnects entirely; bob hears the offline transition
    drop(alice_w);
    drop(alice_r);
    let offline = recv_until(&mut bob_r, |f| {
        f["type"] == "presence.changed" && f["user_id"] == "alice" && f["online"] == false
    })
    .await;
    assert!(offline["last_seen_at"].is_string());
}

#[tokio::test]
async fn posting_session_is_excluded_but_other_sessions_of_author_are_not() {
    let (_base, addr, secret) = start_test_server().await;
    let token = token_for(&secret, "alice");

    let (mut tab1_w, mut tab1_r) = connect(&addr, &token).await;
    let (mut tab2_w, mut tab2_r) = connect(&addr, &token).await;
    join_room(&mut tab1_w, &mut tab1_r, "event:42").await;
    join_room(&mut tab2_w, &mut tab2_r, "event:42").await;
    drain(&mut tab1_r).await;
    drain(&mut tab2_r).await;

    send_cmd(
        &mut tab1_w,
        json!({"cmd": "post", "id": "p1", "room_id": "event:42", "content": "from tab 1"}),
    )
    .await;

    // Tab 2 (same user, different session) receives the broadcast
    let event = recv_until(&mut tab2_r, |f| f["type"] == "message.created").await;
    assert_eq!(event["message"]["content"], "from tab 1");

    // Tab 1 got the ack and nothing else
    let ack = recv_until(&mut tab1_r, |f| f["type"] == "ack").await;
    assert_eq!(ack["message"]["content"], "from tab 1");
    assert_silent(&mut tab1_r).await;
}

#[tokio::test]
async fn rest_post_with_idempotency_key_replays() {
    let (base, _addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let token = token_for(&secret, "alice");

    let url = format!("{}/api/rooms/event:42/messages", base);
    let body = json!({"content": "exactly once", "idempotency_key": "key-1"});

    let first = client
        .post(&url)
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 201);
    let first: Value = first.json().await.unwrap();

    let second = client
        .post(&url)
        .bearer_auth(&token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(second.status(), 200, "Replay is 200, not a new message");
    let second: Value = second.json().await.unwrap();
    assert_eq!(first["id"], second["id"]);
    assert_eq!(second["room_sequence"], 1);

    // History shows a single message
    let history: Value = client
        .get(&url)
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history["messages"].as_array().unwrap().len(), 1);
    assert_eq!(history["has_more"], false);
}

#[tokio::test]
async fn non_member_cannot_post_or_read() {
    let (base, _addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let token = token_for(&secret, "mallory");

    let url = format!("{}/api/rooms/event:42/messages", base);
    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"content": "let me in"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client.get(&url).bearer_auth(&token).send().await.unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn reaction_toggle_broadcasts_both_directions() {
    let (_base, addr, secret) = start_test_server().await;

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    let (mut bob_w, mut bob_r) = connect(&addr, &token_for(&secret, "bob")).await;
    join_room(&mut alice_w, &mut alice_r, "event:42").await;
    join_room(&mut bob_w, &mut bob_r, "event:42").await;
    drain(&mut alice_r).await;
    drain(&mut bob_r).await;

    send_cmd(
        &mut alice_w,
        json!({"cmd": "post", "id": "p1", "room_id": "event:42", "content": "react to me"}),
    )
    .await;
    let ack = recv_until(&mut alice_r, |f| f["type"] == "ack").await;
    let message_id = ack["message"]["id"].as_i64().unwrap();

    // Bob toggles on
    send_cmd(
        &mut bob_w,
        json!({"cmd": "react", "id": "r1", "message_id": message_id, "emoji": "🎉"}),
    )
    .await;
    let added = recv_until(&mut alice_r, |f| f["type"] == "reaction.added").await;
    assert_eq!(added["message_id"], message_id);
    assert_eq!(added["emoji"], "🎉");
    assert_eq!(added["user_id"], "bob");

    // Bob toggles off
    send_cmd(
        &mut bob_w,
        json!({"cmd": "react", "id": "r2", "message_id": message_id, "emoji": "🎉"}),
    )
    .await;
    let removed = recv_until(&mut alice_r, |f| f["type"] == "reaction.removed").await;
    assert_eq!(removed["message_id"], message_id);
    assert_eq!(removed["user_id"], "bob");
}

#[tokio::test]
async fn delete_requires_author_or_elevated_role() {
    let (base, addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    let (mut bob_w, mut bob_r) = connect(&addr, &token_for(&secret, "bob")).await;
    join_room(&mut alice_w, &mut alice_r, "event:42").await;
    join_room(&mut bob_w, &mut bob_r, "event:42").await;
    drain(&mut alice_r).await;
    drain(&mut bob_r).await;

    send_cmd(
        &mut alice_w,
        json!({"cmd": "post", "id": "p1", "room_id": "event:42", "content": "doomed"}),
    )
    .await;
    let ack = recv_until(&mut alice_r, |f| f["type"] == "ack").await;
    let message_id = ack["message"]["id"].as_i64().unwrap();

    // Bob is neither the author nor elevated
    send_cmd(
        &mut bob_w,
        json!({"cmd": "delete_message", "id": "d1", "message_id": message_id}),
    )
    .await;
    let err = recv_until(&mut bob_r, |f| f["type"] == "error").await;
    assert_eq!(err["code"], 403);

    // Carol holds the admin role; her REST delete goes through
    let resp = client
        .delete(format!("{}/api/messages/{}", base, message_id))
        .bearer_auth(token_for(&secret, "carol"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // Everyone in the room hears about it
    let deleted = recv_until(&mut alice_r, |f| f["type"] == "message.deleted").await;
    assert_eq!(deleted["message_id"], message_id);
    assert_eq!(deleted["room_id"], "event:42");

    // And it is really gone
    let resp = client
        .delete(format!("{}/api/messages/{}", base, message_id))
        .bearer_auth(token_for(&secret, "carol"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn typing_indicator_expires_without_explicit_stop() {
    let (_base, addr, secret) = start_test_server().await;

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    let (mut bob_w, mut bob_r) = connect(&addr, &token_for(&secret, "bob")).await;
    join_room(&mut alice_w, &mut alice_r, "event:42").await;
    join_room(&mut bob_w, &mut bob_r, "event:42").await;
    drain(&mut bob_r).await;

    send_cmd(
        &mut alice_w,
        json!({"cmd": "typing", "room_id": "event:42", "is_typing": true}),
    )
    .await;

    let started = recv_until(&mut bob_r, |f| f["type"] == "typing.started").await;
    assert_eq!(started["user_id"], "alice");
    assert_eq!(started["room_id"], "event:42");

    // No explicit stop: the 1s TTL fires exactly one stop event
    let stopped = recv_until(&mut bob_r, |f| f["type"] == "typing.stopped").await;
    assert_eq!(stopped["user_id"], "alice");
    assert_silent(&mut bob_r).await;
}

#[tokio::test]
async fn typing_from_outside_the_room_is_rejected() {
    let (_base, addr, secret) = start_test_server().await;

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    drain(&mut alice_r).await;

    // Alice never joined event:42 on this session
    send_cmd(
        &mut alice_w,
        json!({"cmd": "typing", "id": "t1", "room_id": "event:42", "is_typing": true}),
    )
    .await;
    let err = recv_until(&mut alice_r, |f| f["type"] == "error").await;
    assert_eq!(err["code"], 403);
    assert_eq!(err["request_id"], "t1");
}

#[tokio::test]
async fn presence_transitions_once_across_multiple_sessions() {
    let (_base, addr, secret) = start_test_server().await;

    let (_bob_w, mut bob_r) = connect(&addr, &token_for(&secret, "bob")).await;
    drain(&mut bob_r).await;

    // First session flips alice online
    let (tab1_w, tab1_r) = connect(&addr, &token_for(&secret, "alice")).await;
    let online = recv_until(&mut bob_r, |f| {
        f["type"] == "presence.changed" && f["user_id"] == "alice"
    })
    .await;
    assert_eq!(online["online"], true);

    // Second session: no new transition
    let (tab2_w, tab2_r) = connect(&addr, &token_for(&secret, "alice")).await;
    assert_silent(&mut bob_r).await;

    // Closing one of two sessions: still online, no event
    drop(tab2_w);
    drop(tab2_r);
    assert_silent(&mut bob_r).await;

    // Closing the last one flips offline
    drop(tab1_w);
    drop(tab1_r);
    let offline = recv_until(&mut bob_r, |f| {
        f["type"] == "presence.changed" && f["user_id"] == "alice"
    })
    .await;
    assert_eq!(offline["online"], false);
}

#[tokio::test]
async fn content_limit_counts_characters_not_bytes() {
    let (base, _addr, secret) = start_test_server().await;
    let client = reqwest::Client::new();
    let token = token_for(&secret, "alice");
    let url = format!("{}/api/rooms/event:42/messages", base);

    // 2000 CJK chars is 6000 bytes — still within the 4000-char limit
    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"content": "字".repeat(2000)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    // 4001 chars is over, regardless of encoding
    let resp = client
        .post(&url)
        .bearer_auth(&token)
        .json(&json!({"content": "a".repeat(4001)}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn idle_sessions_are_evicted_with_full_teardown() {
    // Standalone harness so the sweeper can run with a short idle window
    let db = huddle_server::db::init_db_in_memory().expect("Failed to init DB");
    {
        let conn = db.lock().unwrap();
        store::insert_user(&conn, "alice", "Alice", "member").unwrap();
        store::insert_user(&conn, "bob", "Bob", "member").unwrap();
        store::insert_event(&conn, "42", "Launch Party", "alice").unwrap();
        store::add_event_member(&conn, "42", "bob").unwrap();
    }
    let jwt_secret: [u8; 32] = rand::rng().random();
    let state = AppState::new(db, jwt_secret.to_vec(), Duration::from_secs(5));

    tokio::spawn(chat::run_idle_sweeper(
        state.clone(),
        Duration::from_millis(800),
        Duration::from_millis(200),
    ));

    let app = routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let (_alice_w, mut alice_r) = connect(&addr, &token_for(&jwt_secret, "alice")).await;
    let (mut bob_w, mut bob_r) = connect(&addr, &token_for(&jwt_secret, "bob")).await;
    join_room(&mut bob_w, &mut bob_r, "event:42").await;
    drain(&mut bob_r).await;

    // Bob stays active; alice goes silent and ages past the idle window
    let keepalive = tokio::spawn(async move {
        loop {
            send_cmd(&mut bob_w, json!({"cmd": "join", "room_id": "event:42"})).await;
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    });

    // Eviction runs the same teardown as a disconnect: bob hears the
    // offline transition even though alice never closed her socket
    let offline = recv_until(&mut bob_r, |f| {
        f["type"] == "presence.changed" && f["user_id"] == "alice" && f["online"] == false
    })
    .await;
    assert!(offline["last_seen_at"].is_string());
    keepalive.abort();

    // Alice's client is told why: close code 4004
    let close = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match alice_r.next().await {
                Some(Ok(Message::Close(frame))) => return frame,
                Some(Ok(_)) => continue,
                other => panic!("Expected close frame, got: {:?}", other),
            }
        }
    })
    .await
    .expect("Timed out waiting for close");
    let frame = close.expect("Close should carry a frame");
    assert_eq!(u16::from(frame.code), 4004);
}

#[tokio::test]
async fn malformed_frames_get_an_error_reply() {
    let (_base, addr, secret) = start_test_server().await;

    let (mut alice_w, mut alice_r) = connect(&addr, &token_for(&secret, "alice")).await;
    drain(&mut alice_r).await;

    alice_w
        .send(Message::Text("this is not json".into()))
        .await
        .unwrap();
    let err = recv_until(&mut alice_r, |f| f["type"] == "error").await;
    assert_eq!(err["code"], 400);

    // The connection survives a bad frame
    join_room(&mut alice_w, &mut alice_r, "event:42").await;
}
