//! In-process fakes for the backend and the socket connector.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::channel::mpsc as fmpsc;
use futures::SinkExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_tungstenite::tungstenite;

use crate::backend::{ChatBackend, ConfirmReceipt, ContactOutcome, NewGroup};
use crate::channel::{ChannelEvent, ChannelManager, Connector, FrameSink, FrameStream};
use crate::error::{Result, SyncError};
use crate::types::{Group, MemberProfile, Message, parse_timestamp};

const WAIT: Duration = Duration::from_secs(2);

pub fn ts(raw: &str) -> DateTime<Utc> {
    parse_timestamp(raw).unwrap()
}

pub fn group(id: &str, last_message_at: &str) -> Group {
    Group {
        id: id.to_string(),
        name: format!("Listing {id}"),
        members: Vec::new(),
        product_id: format!("p-{id}"),
        cover_image: format!("https://img.local/{id}.png"),
        created_at: Some(ts("2025-01-01T00:00:00Z")),
        last_message_at: Some(ts(last_message_at)),
        read_status: Default::default(),
        buyer: String::new(),
        seller: String::new(),
        buyer_confirmed: false,
        seller_confirmed: false,
        messages: Vec::new(),
    }
}

pub fn message(group_id: &str, sender: &str, content: &str, at: &str) -> Message {
    Message {
        id: None,
        group_id: group_id.to_string(),
        sender_email: sender.to_string(),
        content: content.to_string(),
        timestamp: ts(at),
        client_id: None,
    }
}

pub async fn next_event<C: Connector>(manager: &mut ChannelManager<C>) -> ChannelEvent {
    tokio::time::timeout(WAIT, manager.next_event())
        .await
        .expect("timed out waiting for a channel event")
        .expect("event queue closed")
}

// ── Backend ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FakeBackendState {
    groups: Vec<Group>,
    history: HashMap<String, Vec<Message>>,
    profiles: HashMap<String, MemberProfile>,
    fail_list: bool,
    profile_delay: Option<Duration>,
    calls: Vec<String>,
}

/// Scripted [`ChatBackend`] that records every call as `"op:arg"`.
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<FakeBackendState>>,
}

impl FakeBackend {
    pub fn with_groups(groups: Vec<Group>) -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().groups = groups;
        backend
    }

    pub fn set_history(&self, group_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(group_id.to_string(), messages);
    }

    pub fn set_profile(&self, email: &str, profile: MemberProfile) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(email.to_string(), profile);
    }

    pub fn fail_list(&self) {
        self.state.lock().unwrap().fail_list = true;
    }

    /// Make every profile lookup take `delay` before answering.
    pub fn slow_profiles(&self, delay: Duration) {
        self.state.lock().unwrap().profile_delay = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, FakeBackendState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

fn not_found() -> SyncError {
    SyncError::Status {
        status: 404,
        body: "{\"error\":\"not found\"}".to_string(),
    }
}

impl ChatBackend for FakeBackend {
    fn list_groups(&self) -> impl Future<Output = Result<Vec<Group>>> + Send {
        let state = self.record("list".to_string());
        let result = if state.fail_list {
            Err(SyncError::Status {
                status: 500,
                body: "boom".to_string(),
            })
        } else {
            Ok(state.groups.clone())
        };
        std::future::ready(result)
    }

    fn get_group(&self, group_id: &str) -> impl Future<Output = Result<Group>> + Send {
        let state = self.record(format!("group:{group_id}"));
        let result = state
            .groups
            .iter()
            .find(|g| g.id == group_id)
            .cloned()
            .ok_or_else(not_found);
        std::future::ready(result)
    }

    fn fetch_messages(&self, group_id: &str) -> impl Future<Output = Result<Vec<Message>>> + Send {
        let state = self.record(format!("messages:{group_id}"));
        let result = Ok(state.history.get(group_id).cloned().unwrap_or_default());
        std::future::ready(result)
    }

    fn mark_read(&self, group_id: &str) -> impl Future<Output = Result<()>> + Send {
        drop(self.record(format!("read:{group_id}")));
        std::future::ready(Ok(()))
    }

    fn fetch_profile(&self, email: &str) -> impl Future<Output = Result<MemberProfile>> + Send {
        let state = self.record(format!("profile:{email}"));
        let result = state.profiles.get(email).cloned().ok_or_else(not_found);
        let delay = state.profile_delay;
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }

    fn confirm_trade(
        &self,
        group_id: &str,
        confirmed: bool,
    ) -> impl Future<Output = Result<ConfirmReceipt>> + Send {
        let state = self.record(format!("confirm:{group_id}:{confirmed}"));
        let result = if state.groups.iter().any(|g| g.id == group_id) {
            Ok(ConfirmReceipt {
                message: "ok".to_string(),
                confirmed_by: "seller".to_string(),
                status: confirmed,
            })
        } else {
            Err(not_found())
        };
        std::future::ready(result)
    }

    fn create_group(&self, request: &NewGroup) -> impl Future<Output = Result<ContactOutcome>> + Send {
        let mut state = self.record(format!("create:{}", request.product_id));
        let existing = state
            .groups
            .iter()
            .find(|g| g.product_id == request.product_id)
            .map(|g| g.id.clone());
        let result = match existing {
            Some(id) => ContactOutcome::Existing(id),
            None => {
                let id = format!("new-{}", request.product_id);
                let mut created = group(&id, "2025-03-01T00:00:00Z");
                created.name = request.name.clone();
                created.product_id = request.product_id.clone();
                created.members = request.members.clone();
                state.groups.push(created);
                ContactOutcome::Created(id)
            }
        };
        std::future::ready(Ok(result))
    }
}

// ── Connector ───────────────────────────────────────────────────────

/// Server side of one fake socket.
#[derive(Clone)]
pub struct FakeLink {
    pub url: String,
    push: Arc<Mutex<Option<fmpsc::UnboundedSender<Result<String>>>>>,
    sent: Arc<tokio::sync::Mutex<fmpsc::UnboundedReceiver<String>>>,
}

impl FakeLink {
    /// Deliver a text frame to the client.
    pub fn push(&self, text: &str) {
        if let Some(tx) = self.push.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Ok(text.to_string()));
        }
    }

    pub fn push_error(&self) {
        if let Some(tx) = self.push.lock().unwrap().as_ref() {
            let _ = tx.unbounded_send(Err(SyncError::from(
                tungstenite::Error::ConnectionClosed,
            )));
        }
    }

    /// End the server side of the stream.
    pub fn hang_up(&self) {
        self.push.lock().unwrap().take();
    }

    /// Next frame the client sent; `None` once the client closed its side.
    pub async fn next_sent(&self) -> Option<String> {
        let mut sent = self.sent.lock().await;
        tokio::time::timeout(WAIT, sent.next())
            .await
            .expect("timed out waiting for a client frame")
    }

    /// Frames already sent, without waiting.
    pub async fn drain_sent(&self) -> Vec<String> {
        let mut sent = self.sent.lock().await;
        let mut out = Vec::new();
        while let Ok(text) = sent.try_recv() {
            out.push(text);
        }
        out
    }
}

#[derive(Default)]
struct FakeConnectorState {
    refuse: bool,
    links: Vec<FakeLink>,
}

/// [`Connector`] handing out in-memory links instead of sockets.
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<FakeConnectorState>>,
}

impl FakeConnector {
    pub fn refusing() -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().refuse = true;
        connector
    }

    pub fn link(&self, index: usize) -> FakeLink {
        self.state.lock().unwrap().links[index].clone()
    }

    /// Most recent link whose url contains `needle`.
    pub fn find(&self, needle: &str) -> FakeLink {
        self.state
            .lock()
            .unwrap()
            .links
            .iter()
            .rev()
            .find(|l| l.url.contains(needle))
            .cloned()
            .unwrap_or_else(|| panic!("no link matching {needle}"))
    }

    pub fn link_count(&self) -> usize {
        self.state.lock().unwrap().links.len()
    }

    fn open(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let mut state = self.state.lock().unwrap();
        if state.refuse {
            let refused = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
            return Err(SyncError::from(tungstenite::Error::Io(refused)));
        }
        let (push_tx, push_rx) = fmpsc::unbounded();
        let (sent_tx, sent_rx) = fmpsc::unbounded::<String>();
        state.links.push(FakeLink {
            url: url.to_string(),
            push: Arc::new(Mutex::new(Some(push_tx))),
            sent: Arc::new(tokio::sync::Mutex::new(sent_rx)),
        });
        let sink = sent_tx.sink_map_err(|_| SyncError::ChannelClosed);
        Ok((Box::pin(sink), Box::pin(push_rx)))
    }
}

impl Connector for FakeConnector {
    fn connect(&self, url: &str) -> impl Future<Output = Result<(FrameSink, FrameStream)>> + Send {
        std::future::ready(self.open(url))
    }
}
