//! The live conversation synchronizer.
//!
//! [`Synchronizer`] owns the conversation book, the push channels and a pull
//! backend. The caller drives it from a single task: wait on
//! [`Synchronizer::next_event`], feed the result to
//! [`Synchronizer::handle_event`], and interleave user commands between
//! events. Observable changes are reported on the [`SyncUpdate`] stream.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, ConfirmReceipt, ContactOutcome, NewGroup};
use crate::book::ConversationBook;
use crate::channel::{
    ChannelEvent, ChannelKind, ChannelManager, ChannelSignal, ChannelState, Connector,
};
use crate::error::{Result, SyncError};
use crate::events::{CreationEvent, GlobalEvent, encode_outgoing, parse_active};
use crate::types::{ContentRules, Group, Message};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Identity of the local member.
    pub email: String,
    pub ws_base_url: String,
    pub rules: ContentRules,
}

/// A message landed in a conversation the user is not looking at.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub group_id: String,
    pub name: String,
    pub cover_image: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    /// Order, unread state or names in the list may have changed.
    ListChanged,
    HistoryLoaded { group_id: String },
    /// Carries the appended message itself, so consumers that lag behind the
    /// book still see every message once and in order.
    MessageAppended(Message),
    GroupAdded { group_id: String },
    Alert(Alert),
    ChannelState {
        kind: ChannelKind,
        state: ChannelState,
    },
}

pub struct Synchronizer<B: ChatBackend, C: Connector> {
    backend: B,
    channels: ChannelManager<C>,
    book: ConversationBook,
    rules: ContentRules,
    updates: mpsc::UnboundedSender<SyncUpdate>,
}

impl<B: ChatBackend, C: Connector> Synchronizer<B, C> {
    pub fn new(
        backend: B,
        connector: C,
        settings: SyncSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SyncUpdate>)> {
        let channels = ChannelManager::new(connector, &settings.ws_base_url, &settings.email)?;
        let (updates, updates_rx) = mpsc::unbounded_channel();
        Ok((
            Self {
                backend,
                channels,
                book: ConversationBook::new(settings.email),
                rules: settings.rules,
                updates,
            },
            updates_rx,
        ))
    }

    pub fn book(&self) -> &ConversationBook {
        &self.book
    }

    pub fn channels(&self) -> &ChannelManager<C> {
        &self.channels
    }

    pub fn rules(&self) -> &ContentRules {
        &self.rules
    }

    fn emit(&self, update: SyncUpdate) {
        // A consumer that stopped listening is not an error.
        let _ = self.updates.send(update);
    }

    /// Open the process-wide notification and new-conversation channels.
    pub fn start(&mut self) {
        info!(email = self.book.me(), "starting synchronizer");
        self.channels.open_global();
        self.channels.open_creation();
    }

    /// Close every channel and drop the active selection.
    pub fn shutdown(&mut self) {
        self.channels.close_all();
        self.book.set_active(None);
        info!("synchronizer stopped");
    }

    /// Pull the conversation list. On failure the held list is kept.
    pub async fn load_conversations(&mut self) -> Result<()> {
        let groups = match self.backend.list_groups().await {
            Ok(groups) => groups,
            Err(e) => {
                warn!("failed to load conversations: {}", e);
                return Err(e);
            }
        };
        info!(count = groups.len(), "loaded conversations");
        self.book.replace_groups(groups);
        self.emit(SyncUpdate::ListChanged);

        let members = self.book.other_members(self.book.groups());
        self.resolve_profiles(members).await;
        Ok(())
    }

    /// Fetch and cache display profiles. Lookups run concurrently; failures
    /// leave the member unnamed.
    pub async fn resolve_profiles(&mut self, emails: Vec<String>) {
        if emails.is_empty() {
            return;
        }
        let lookups = emails.iter().map(|email| self.backend.fetch_profile(email));
        let results = join_all(lookups).await;

        let mut resolved = 0;
        for (email, result) in emails.into_iter().zip(results) {
            match result {
                Ok(profile) => {
                    self.book.cache_profile(email, profile);
                    resolved += 1;
                }
                Err(e) => debug!(%email, "profile lookup failed: {}", e),
            }
        }
        if resolved > 0 {
            self.emit(SyncUpdate::ListChanged);
        }
    }

    /// Make `group_id` the active conversation: mark it read, pull its
    /// history and open its push channel. Any previous channel is closed first.
    pub async fn open_conversation(&mut self, group_id: &str) -> Result<()> {
        if !self.book.contains(group_id) {
            let group = self.backend.get_group(group_id).await.map_err(|e| {
                warn!(group_id, "cannot open conversation: {}", e);
                match e {
                    SyncError::Status { status: 404, .. } => {
                        SyncError::UnknownConversation(group_id.to_string())
                    }
                    other => other,
                }
            })?;
            self.add_group(group).await;
        }

        self.channels.close_active();
        self.book.set_active(Some(group_id.to_string()));

        match self.backend.mark_read(group_id).await {
            Ok(()) => {
                self.book.mark_read(group_id, Utc::now());
            }
            Err(e) => warn!(group_id, "failed to mark conversation read: {}", e),
        }

        match self.backend.fetch_messages(group_id).await {
            Ok(messages) => {
                debug!(group_id, count = messages.len(), "history loaded");
                self.book.set_history(group_id, messages);
                self.emit(SyncUpdate::HistoryLoaded {
                    group_id: group_id.to_string(),
                });
            }
            Err(e) => warn!(group_id, "failed to load history: {}", e),
        }

        // Navigation may have moved on while the pulls were in flight.
        if self.book.is_active(group_id) {
            self.channels.open_active(group_id);
        }
        self.emit(SyncUpdate::ListChanged);
        Ok(())
    }

    /// Navigate away from the active conversation.
    pub fn close_conversation(&mut self) -> bool {
        let closed = self.channels.close_active();
        let was_active = self.book.active().is_some();
        self.book.set_active(None);
        if was_active {
            self.emit(SyncUpdate::ListChanged);
        }
        closed || was_active
    }

    /// Send on the active channel and append an optimistic local copy.
    ///
    /// Returns false when nothing was sent: blank content, no active
    /// conversation, or a channel that is not open. Nothing is queued.
    pub fn send_message(&mut self, content: &str) -> bool {
        let content = content.trim();
        if content.is_empty() {
            return false;
        }
        let Some(group_id) = self.channels.active_scope().map(str::to_owned) else {
            warn!("no active conversation; message dropped");
            return false;
        };
        if self.channels.state(ChannelKind::Active) != ChannelState::Open {
            warn!(%group_id, "conversation channel not open; message dropped");
            return false;
        }

        let message = Message::outgoing(&group_id, self.book.me(), content, Utc::now());
        let sent = encode_outgoing(&message).and_then(|frame| self.channels.send_active(frame));
        if let Err(e) = sent {
            warn!(%group_id, "send failed: {}", e);
            return false;
        }

        let timestamp = message.timestamp;
        self.book.append_message(message.clone());
        self.book.mark_read(&group_id, timestamp);
        self.emit(SyncUpdate::MessageAppended(message));
        true
    }

    /// Confirm (or revoke) use of the central trading system. A confirmation
    /// in the open conversation is also announced in the chat.
    pub async fn confirm_trade(&mut self, group_id: &str, confirmed: bool) -> Result<ConfirmReceipt> {
        let receipt = self.backend.confirm_trade(group_id, confirmed).await?;
        info!(group_id, role = %receipt.confirmed_by, confirmed = receipt.status, "trade confirmation recorded");
        if self
            .book
            .set_confirmation(group_id, &receipt.confirmed_by, receipt.status)
        {
            self.emit(SyncUpdate::ListChanged);
        }

        if confirmed && self.channels.active_scope() == Some(group_id) {
            let sentinel = self.rules.confirm_message.clone();
            if !self.send_message(&sentinel) {
                debug!(group_id, "confirmation recorded without chat announcement");
            }
        }
        Ok(receipt)
    }

    /// Start a conversation with `seller` about a listing. An existing
    /// conversation for the same listing is returned instead of a new one.
    pub async fn contact_seller(
        &mut self,
        product_id: &str,
        seller: &str,
        name: &str,
        cover_image: &str,
    ) -> Result<ContactOutcome> {
        let request = NewGroup {
            name: name.to_string(),
            members: vec![self.book.me().to_string(), seller.to_string()],
            product_id: product_id.to_string(),
            cover_image: cover_image.to_string(),
        };
        let outcome = self.backend.create_group(&request).await?;
        let group_id = outcome.group_id();
        info!(group_id, ?outcome, "contacted seller");

        if !self.book.contains(group_id) {
            match self.backend.get_group(group_id).await {
                Ok(group) => self.add_group(group).await,
                Err(e) => warn!(group_id, "failed to fetch new conversation: {}", e),
            }
        }
        Ok(outcome)
    }

    /// Wait for the next channel event.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.channels.next_event().await
    }

    /// Apply one channel event. Stale events are dropped.
    pub async fn handle_event(&mut self, event: ChannelEvent) {
        if !self.channels.observe(&event) {
            debug!(kind = %event.kind, epoch = event.epoch, "dropping stale channel event");
            return;
        }
        match event.signal {
            ChannelSignal::Opened => self.emit(SyncUpdate::ChannelState {
                kind: event.kind,
                state: ChannelState::Open,
            }),
            ChannelSignal::Closed => self.emit(SyncUpdate::ChannelState {
                kind: event.kind,
                state: ChannelState::Closed,
            }),
            ChannelSignal::Frame(text) => match event.kind {
                ChannelKind::Global => self.on_global(&text).await,
                ChannelKind::Creation => self.on_creation(&text).await,
                ChannelKind::Active => self.on_active(&text),
            },
        }
    }

    async fn on_global(&mut self, text: &str) {
        let event = match GlobalEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!("malformed notification: {}", e);
                return;
            }
        };
        match event {
            GlobalEvent::Notification {
                group_id,
                timestamp,
            } => self.on_notification(group_id, timestamp).await,
            GlobalEvent::Message(message) => {
                let group_id = message.group_id.clone();
                if !self.book.contains(&group_id) {
                    debug!(%group_id, "envelope for unknown conversation ignored");
                    return;
                }
                if self.book.is_active(&group_id) {
                    // The active channel delivers the body itself.
                    self.book.touch(&group_id, message.timestamp);
                    self.emit(SyncUpdate::ListChanged);
                } else if self.book.append_message(message.clone()) {
                    self.emit(SyncUpdate::MessageAppended(message));
                }
            }
            GlobalEvent::Ignored(kind) => debug!(%kind, "ignoring global frame"),
        }
    }

    async fn on_notification(&mut self, group_id: String, timestamp: DateTime<Utc>) {
        if !self.book.contains(&group_id) {
            match self.backend.get_group(&group_id).await {
                Ok(group) => self.add_group(group).await,
                Err(e) => {
                    warn!(%group_id, "notification for unknown conversation: {}", e);
                    return;
                }
            }
        }
        self.book.touch(&group_id, timestamp);
        self.emit(SyncUpdate::ListChanged);

        if self.book.is_active(&group_id) {
            return;
        }
        if let Some(group) = self.book.get(&group_id) {
            let alert = Alert {
                group_id: group.id.clone(),
                name: group.name.clone(),
                cover_image: group.cover_image.clone(),
                timestamp,
            };
            info!(group_id = %alert.group_id, name = %alert.name, "new message");
            self.emit(SyncUpdate::Alert(alert));
        }
    }

    async fn on_creation(&mut self, text: &str) {
        match CreationEvent::parse(text) {
            Ok(CreationEvent::GroupCreated(group)) => self.add_group(group).await,
            Ok(CreationEvent::Ignored(kind)) => debug!(%kind, "ignoring creation frame"),
            Err(e) => warn!("malformed creation frame: {}", e),
        }
    }

    fn on_active(&mut self, text: &str) {
        let message = match parse_active(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("malformed chat frame: {}", e);
                return;
            }
        };
        if self.channels.active_scope() != Some(message.group_id.as_str()) {
            debug!(group_id = %message.group_id, "chat frame outside channel scope dropped");
            return;
        }
        if self.book.append_message(message.clone()) {
            self.emit(SyncUpdate::MessageAppended(message));
        }
    }

    /// Idempotent insert; profiles are resolved either way.
    async fn add_group(&mut self, group: Group) {
        let members = self.book.other_members([&group]);
        let group_id = group.id.clone();
        if self.book.insert_group(group) {
            info!(%group_id, "conversation added");
            self.emit(SyncUpdate::GroupAdded { group_id });
        }
        self.resolve_profiles(members).await;
    }
}
