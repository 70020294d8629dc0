//! Push channel lifecycle.
//!
//! Each channel is a tokio task owning one socket. It reports `Opened`,
//! every text frame, and finally `Closed` into the manager's event queue,
//! tagged with the channel kind and an epoch. The manager keeps at most one
//! channel per kind; replacing or closing a channel cancels its task, and
//! events carrying a superseded epoch are treated as stale.
//!
//! State per channel: closed -> connecting -> open -> closed. There is no
//! reconnection; a new channel is a new epoch.

use futures::{Sink, SinkExt, Stream, StreamExt};
use reqwest::Url;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};

pub type FrameSink = Pin<Box<dyn Sink<String, Error = SyncError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Opens the text-frame duplex behind a channel.
pub trait Connector: Clone + Send + Sync + 'static {
    fn connect(&self, url: &str) -> impl Future<Output = Result<(FrameSink, FrameStream)>> + Send;
}

/// [`Connector`] over tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream)> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url).await?;
        let (ws_write, ws_read) = ws_stream.split();

        let sink = ws_write
            .sink_map_err(SyncError::from)
            .with(|text: String| {
                futures::future::ok::<_, SyncError>(tungstenite::Message::Text(text.into()))
            });
        let stream = ws_read.filter_map(|frame| {
            futures::future::ready(match frame {
                Ok(tungstenite::Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                // Pings are answered by tungstenite; binary frames are not part of the protocol.
                Ok(_) => None,
                Err(e) => Some(Err(SyncError::from(e))),
            })
        });
        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Process-wide new message notifications.
    Global,
    /// Process-wide new conversation announcements.
    Creation,
    /// The open conversation.
    Active,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Creation => "creation",
            Self::Active => "active",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Connecting,
    Open,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    Opened,
    Frame(String),
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelEvent {
    pub kind: ChannelKind,
    pub epoch: u64,
    pub signal: ChannelSignal,
}

/// Live channel owned by the manager. Dropping it cancels the task.
#[derive(Debug)]
struct ChannelHandle {
    epoch: u64,
    scope: Option<String>,
    state: ChannelState,
    outgoing: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct ChannelManager<C: Connector> {
    connector: C,
    ws_base: Url,
    email: String,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent>,
    global: Option<ChannelHandle>,
    creation: Option<ChannelHandle>,
    active: Option<ChannelHandle>,
    next_epoch: u64,
}

impl<C: Connector> ChannelManager<C> {
    pub fn new(connector: C, ws_base_url: &str, email: impl Into<String>) -> Result<Self> {
        let invalid = |reason: String| SyncError::InvalidUrl {
            url: ws_base_url.to_string(),
            reason,
        };
        let ws_base = Url::parse(ws_base_url).map_err(|e| invalid(e.to_string()))?;
        if ws_base.cannot_be_a_base() || !matches!(ws_base.scheme(), "ws" | "wss") {
            return Err(invalid("expected a ws(s) base url".to_string()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            connector,
            ws_base,
            email: email.into(),
            events_tx,
            events_rx,
            global: None,
            creation: None,
            active: None,
            next_epoch: 1,
        })
    }

    fn url(&self, path: &[&str], params: &[(&str, &str)]) -> String {
        let mut url = self.ws_base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        url.query_pairs_mut().extend_pairs(params);
        url.to_string()
    }

    pub fn global_url(&self) -> String {
        self.url(&["ws", "listen"], &[("email", self.email.as_str())])
    }

    pub fn creation_url(&self) -> String {
        self.url(&["ws", "watch-new-groups"], &[("email", self.email.as_str())])
    }

    pub fn active_url(&self, group_id: &str) -> String {
        self.url(
            &["ws", "chat"],
            &[("group_id", group_id), ("email", self.email.as_str())],
        )
    }

    fn slot(&self, kind: ChannelKind) -> &Option<ChannelHandle> {
        match kind {
            ChannelKind::Global => &self.global,
            ChannelKind::Creation => &self.creation,
            ChannelKind::Active => &self.active,
        }
    }

    fn slot_mut(&mut self, kind: ChannelKind) -> &mut Option<ChannelHandle> {
        match kind {
            ChannelKind::Global => &mut self.global,
            ChannelKind::Creation => &mut self.creation,
            ChannelKind::Active => &mut self.active,
        }
    }

    fn spawn(&mut self, kind: ChannelKind, scope: Option<String>, url: String) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(run_channel(
            self.connector.clone(),
            url,
            kind,
            epoch,
            self.events_tx.clone(),
            outgoing_rx,
            cancel.clone(),
        ));

        // Assigning drops (and so cancels) whatever held the slot before.
        *self.slot_mut(kind) = Some(ChannelHandle {
            epoch,
            scope,
            state: ChannelState::Connecting,
            outgoing,
            cancel,
        });
        epoch
    }

    pub fn open_global(&mut self) -> u64 {
        let url = self.global_url();
        self.spawn(ChannelKind::Global, None, url)
    }

    pub fn open_creation(&mut self) -> u64 {
        let url = self.creation_url();
        self.spawn(ChannelKind::Creation, None, url)
    }

    /// Open the conversation channel for `group_id`, closing any previous one first.
    pub fn open_active(&mut self, group_id: &str) -> u64 {
        self.close_active();
        let url = self.active_url(group_id);
        let epoch = self.spawn(ChannelKind::Active, Some(group_id.to_string()), url);
        info!(group_id, epoch, "opening conversation channel");
        epoch
    }

    pub fn close(&mut self, kind: ChannelKind) -> bool {
        match self.slot_mut(kind).take() {
            Some(handle) => {
                debug!(%kind, epoch = handle.epoch, "closing channel");
                true
            }
            None => false,
        }
    }

    pub fn close_active(&mut self) -> bool {
        self.close(ChannelKind::Active)
    }

    pub fn close_all(&mut self) {
        for kind in [ChannelKind::Global, ChannelKind::Creation, ChannelKind::Active] {
            self.close(kind);
        }
    }

    pub fn state(&self, kind: ChannelKind) -> ChannelState {
        self.slot(kind)
            .as_ref()
            .map_or(ChannelState::Closed, |h| h.state)
    }

    /// Conversation the active channel is scoped to.
    pub fn active_scope(&self) -> Option<&str> {
        self.active.as_ref().and_then(|h| h.scope.as_deref())
    }

    /// Hand a frame to the active channel. Fails unless the channel is open.
    pub fn send_active(&self, text: String) -> Result<()> {
        match &self.active {
            Some(handle) if handle.state == ChannelState::Open => handle
                .outgoing
                .send(text)
                .map_err(|_| SyncError::ChannelClosed),
            _ => Err(SyncError::ChannelClosed),
        }
    }

    /// Wait for the next event from any channel task.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events_rx.recv().await
    }

    /// Apply an event's lifecycle effect. Returns false for stale events,
    /// which callers must ignore.
    pub fn observe(&mut self, event: &ChannelEvent) -> bool {
        let slot = self.slot_mut(event.kind);
        match slot {
            Some(handle) if handle.epoch == event.epoch => {}
            _ => return false,
        }
        match event.signal {
            ChannelSignal::Opened => {
                if let Some(handle) = slot.as_mut() {
                    handle.state = ChannelState::Open;
                }
                info!(kind = %event.kind, epoch = event.epoch, "channel open");
            }
            ChannelSignal::Closed => {
                *slot = None;
                info!(kind = %event.kind, epoch = event.epoch, "channel closed");
            }
            ChannelSignal::Frame(_) => {}
        }
        true
    }
}

impl<C: Connector> Drop for ChannelManager<C> {
    fn drop(&mut self) {
        self.close_all();
    }
}

async fn run_channel<C: Connector>(
    connector: C,
    url: String,
    kind: ChannelKind,
    epoch: u64,
    events: mpsc::UnboundedSender<ChannelEvent>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let emit = |signal: ChannelSignal| {
        // The receiver only goes away with the manager.
        let _ = events.send(ChannelEvent {
            kind,
            epoch,
            signal,
        });
    };

    debug!(%kind, epoch, %url, "connecting");
    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            emit(ChannelSignal::Closed);
            return;
        }
        result = connector.connect(&url) => result,
    };
    let (mut sink, mut stream) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%kind, epoch, "channel connect failed: {}", e);
            emit(ChannelSignal::Closed);
            return;
        }
    };
    emit(ChannelSignal::Opened);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = sink.close().await {
                    debug!(%kind, epoch, "close handshake failed: {}", e);
                }
                break;
            }
            Some(text) = outgoing.recv() => {
                if let Err(e) = sink.send(text).await {
                    warn!(%kind, epoch, "channel send failed: {}", e);
                    break;
                }
            }
            frame = stream.next() => match frame {
                Some(Ok(text)) => emit(ChannelSignal::Frame(text)),
                Some(Err(e)) => {
                    warn!(%kind, epoch, "channel transport error: {}", e);
                    break;
                }
                None => break,
            },
        }
    }
    emit(ChannelSignal::Closed);
}
