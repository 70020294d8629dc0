//! End-to-end tests against an in-process axum server speaking the
//! marketplace's REST and WebSocket protocol.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use goose_chat::{
    ChannelKind, ChannelState, ChatBackend, ContactOutcome, ContentRules, HttpBackend, NewGroup,
    SyncError, SyncSettings, SyncUpdate, Synchronizer, WsConnector,
};

const TOKEN: &str = "tok-123";
const ME: &str = "me@x.io";

#[derive(Clone, Default)]
struct ServerState {
    hits: Arc<Mutex<Vec<String>>>,
}

impl ServerState {
    fn hit(&self, what: String) {
        self.hits.lock().unwrap().push(what);
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(format!("Bearer {TOKEN}").as_str())
}

fn group_json(id: &str, last_message_at: &str) -> Value {
    json!({
        "id": id,
        "name": format!("Listing {id}"),
        "members": [ME, format!("seller-{id}@x.io")],
        "product_id": format!("p-{id}"),
        "cover_image": format!("https://img.local/{id}.png"),
        "created_at": "2025-03-01T08:00:00Z",
        "last_message_at": last_message_at,
        "read_status": {},
    })
}

async fn list_groups(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "Unauthorized"}))).into_response();
    }
    Json(json!([
        group_json("g1", "2025-03-01T10:00:00Z"),
        group_json("g2", "2025-03-01T09:00:00Z"),
    ]))
    .into_response()
}

async fn get_group(Path(id): Path<String>) -> Response {
    match id.as_str() {
        "g1" => Json(group_json("g1", "2025-03-01T10:00:00Z")).into_response(),
        "g2" => Json(group_json("g2", "2025-03-01T09:00:00Z")).into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({"error": "Group not found"}))).into_response(),
    }
}

async fn messages(Path(id): Path<String>) -> Response {
    if id == "empty" {
        return Json(Value::Null).into_response();
    }
    Json(json!([{
        "id": "m1",
        "group_id": id,
        "senderEmail": format!("seller-{id}@x.io"),
        "content": "still available?",
        "timestamp": "2025-03-01T10:00:00+07:00",
    }]))
    .into_response()
}

async fn read_status(State(state): State<ServerState>, Path(id): Path<String>) -> Json<Value> {
    state.hit(format!("read:{id}"));
    Json(json!({"message": "Read status updated"}))
}

async fn profile(Path(email): Path<String>) -> Response {
    if email.starts_with("seller-") {
        Json(json!({
            "ID": "u1",
            "FirstName": "Somchai",
            "LastName": "Dee",
            "NameStore": "",
            "Email": email,
            "Username": "somchai",
            "Games": null,
        }))
        .into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(json!({"error": "User not found"}))).into_response()
    }
}

async fn confirm(Path(id): Path<String>, Json(body): Json<Value>) -> Response {
    if id != "g1" {
        return (StatusCode::NOT_FOUND, Json(json!({"error": "Group not found"}))).into_response();
    }
    let confirmed = body["confirmed"].as_bool().unwrap_or(false);
    Json(json!({"message": "ok", "confirmed_by": "buyer", "status": confirmed})).into_response()
}

async fn create_group(Json(body): Json<Value>) -> Response {
    if body["product_id"] == "p-g1" {
        return (
            StatusCode::CONFLICT,
            Json(json!({"error": "already contacted", "group_id": "g1"})),
        )
            .into_response();
    }
    (StatusCode::CREATED, Json(json!({"group_id": "g-new"}))).into_response()
}

async fn listen(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        let note = json!({
            "type": "new_message_notification",
            "group_id": "g2",
            "timestamp": "2025-03-01T12:00:00Z",
        })
        .to_string();
        if socket.send(WsMessage::Text(note.into())).await.is_err() {
            return;
        }
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

async fn watch_new_groups(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket: WebSocket| async move {
        while let Some(Ok(_)) = socket.recv().await {}
    })
}

/// Echoes every frame back, as the backend broadcasts to all members.
async fn chat(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let group_id = params.get("group_id").cloned().unwrap_or_default();
    state.hit(format!("ws:{group_id}"));
    ws.on_upgrade(move |mut socket: WebSocket| async move {
        while let Some(Ok(frame)) = socket.recv().await {
            if let WsMessage::Text(text) = frame {
                state.hit(format!("sent:{}", text.as_str()));
                if socket.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    })
}

async fn serve() -> (SocketAddr, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/api/chat/groups", get(list_groups))
        .route("/api/chat/groups/{id}", get(get_group))
        .route("/api/chat/groups/{id}/read-status", put(read_status))
        .route("/api/chat/groups/{id}/confirm", patch(confirm))
        .route("/api/chat/messages/{id}", get(messages))
        .route("/api/chat/group", post(create_group))
        .route("/api/user/profile/{email}", get(profile))
        .route("/ws/listen", get(listen))
        .route("/ws/watch-new-groups", get(watch_new_groups))
        .route("/ws/chat", get(chat))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn backend(addr: SocketAddr, token: &str) -> HttpBackend {
    HttpBackend::new(&format!("http://{addr}/api"), token, Duration::from_secs(5)).unwrap()
}

// ── HTTP backend ────────────────────────────────────────────────────

#[tokio::test]
async fn test_http_pulls() {
    let (addr, state) = serve().await;
    let api = backend(addr, TOKEN);

    let groups = api.list_groups().await.unwrap();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0].members[1], "seller-g1@x.io");

    let history = api.fetch_messages("g1").await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].timestamp.to_rfc3339(), "2025-03-01T03:00:00+00:00");
    assert!(api.fetch_messages("empty").await.unwrap().is_empty());

    api.mark_read("g1").await.unwrap();
    assert_eq!(state.hits(), vec!["read:g1"]);

    let profile = api.fetch_profile("seller-g1@x.io").await.unwrap();
    assert_eq!(profile.display_name(), "Somchai Dee");
    assert_eq!(profile.handle("x"), "somchai");
}

#[tokio::test]
async fn test_http_errors() {
    let (addr, _state) = serve().await;

    let err = backend(addr, "wrong").list_groups().await.unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 401, .. }));

    let api = backend(addr, TOKEN);
    match api.get_group("nope").await.unwrap_err() {
        SyncError::Status { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("Group not found"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(api.fetch_profile("buyer@x.io").await.is_err());
}

#[tokio::test]
async fn test_http_unreachable_is_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = backend(addr, TOKEN).list_groups().await.unwrap_err();
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn test_http_commands() {
    let (addr, _state) = serve().await;
    let api = backend(addr, TOKEN);

    let receipt = api.confirm_trade("g1", true).await.unwrap();
    assert_eq!(receipt.confirmed_by, "buyer");
    assert!(receipt.status);

    let existing = api
        .create_group(&NewGroup {
            name: "Listing g1".to_string(),
            members: vec![ME.to_string(), "seller-g1@x.io".to_string()],
            product_id: "p-g1".to_string(),
            cover_image: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(existing, ContactOutcome::Existing("g1".to_string()));

    let created = api
        .create_group(&NewGroup {
            name: "Fresh".to_string(),
            members: vec![ME.to_string(), "s@x.io".to_string()],
            product_id: "p-fresh".to_string(),
            cover_image: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(created, ContactOutcome::Created("g-new".to_string()));
}

// ── Live synchronizer ───────────────────────────────────────────────

type LiveSync = Synchronizer<HttpBackend, WsConnector>;

/// Drive the synchronizer until an update matching `want` is observed.
async fn wait_for(
    sync: &mut LiveSync,
    updates: &mut mpsc::UnboundedReceiver<SyncUpdate>,
    want: impl Fn(&SyncUpdate) -> bool,
) -> SyncUpdate {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        while let Ok(update) = updates.try_recv() {
            if want(&update) {
                return update;
            }
        }
        let event = tokio::time::timeout_at(deadline, sync.next_event())
            .await
            .expect("timed out waiting for update")
            .expect("event queue closed");
        sync.handle_event(event).await;
    }
}

fn is_open(kind: ChannelKind) -> impl Fn(&SyncUpdate) -> bool {
    move |u| {
        *u == SyncUpdate::ChannelState {
            kind,
            state: ChannelState::Open,
        }
    }
}

#[tokio::test]
async fn test_live_conversation_roundtrip() {
    let (addr, state) = serve().await;
    let (mut sync, mut updates) = Synchronizer::new(
        backend(addr, TOKEN),
        WsConnector,
        SyncSettings {
            email: ME.to_string(),
            ws_base_url: format!("ws://{addr}"),
            rules: ContentRules::default(),
        },
    )
    .unwrap();

    sync.start();
    sync.load_conversations().await.unwrap();
    let ids: Vec<_> = sync.book().groups().iter().map(|g| g.id.clone()).collect();
    assert_eq!(ids, vec!["g1", "g2"]);
    let g1 = sync.book().get("g1").unwrap().clone();
    assert_eq!(sync.book().counterpart_name(&g1), "Somchai Dee");

    // The listen socket announces a message in g2 as soon as it connects.
    let alert = wait_for(&mut sync, &mut updates, |u| matches!(u, SyncUpdate::Alert(_))).await;
    let SyncUpdate::Alert(alert) = alert else {
        unreachable!()
    };
    assert_eq!(alert.group_id, "g2");
    assert_eq!(alert.name, "Listing g2");
    assert_eq!(sync.book().groups()[0].id, "g2");

    sync.open_conversation("g1").await.unwrap();
    assert_eq!(sync.book().get("g1").unwrap().messages.len(), 1);
    wait_for(&mut sync, &mut updates, is_open(ChannelKind::Active)).await;

    assert!(sync.send_message("hello"));
    let local = sync.book().get("g1").unwrap().last_message().unwrap().clone();
    assert!(local.is_local());
    while updates.try_recv().is_ok() {}

    // The echo is appended as its own message.
    wait_for(&mut sync, &mut updates, |u| {
        matches!(u, SyncUpdate::MessageAppended(m) if m.group_id == "g1")
    })
    .await;
    let g1 = sync.book().get("g1").unwrap();
    assert_eq!(g1.messages.len(), 3);
    let echo = g1.last_message().unwrap();
    assert_eq!(echo.content, "hello");
    assert!(!echo.is_local());
    assert_eq!(echo.sender_email, ME);

    let hits = state.hits();
    assert!(hits.contains(&"read:g1".to_string()));
    assert!(hits.contains(&"ws:g1".to_string()));
    assert!(hits.iter().any(|h| h.starts_with("sent:") && h.contains("\"hello\"")));

    sync.shutdown();
    assert_eq!(
        sync.channels().state(ChannelKind::Active),
        ChannelState::Closed
    );
}

#[tokio::test]
async fn test_live_refused_channel_closes_quietly() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (mut sync, mut updates) = Synchronizer::new(
        backend(addr, TOKEN),
        WsConnector,
        SyncSettings {
            email: ME.to_string(),
            ws_base_url: format!("ws://{addr}"),
            rules: ContentRules::default(),
        },
    )
    .unwrap();
    sync.start();

    for _ in 0..2 {
        let update = wait_for(&mut sync, &mut updates, |u| {
            matches!(u, SyncUpdate::ChannelState { state: ChannelState::Closed, .. })
        })
        .await;
        assert!(matches!(update, SyncUpdate::ChannelState { .. }));
    }
    assert_eq!(sync.channels().state(ChannelKind::Global), ChannelState::Closed);
    assert_eq!(sync.channels().state(ChannelKind::Creation), ChannelState::Closed);
    assert!(sync.load_conversations().await.is_err());
    assert!(sync.book().groups().is_empty());
}
