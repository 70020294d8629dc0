//! Goose Nest chat client.
//!
//! Keeps the marketplace's conversation list and the open conversation in
//! sync with the backend, using REST pulls for history and read state and
//! three WebSocket push channels for live traffic:
//!
//! - the global channel (`/ws/listen`) announces messages in any conversation,
//! - the creation channel (`/ws/watch-new-groups`) announces new conversations,
//! - the active channel (`/ws/chat`) carries the open conversation both ways.
//!
//! [`Synchronizer`] is the entry point; it is generic over the pull
//! [`ChatBackend`] and the socket [`Connector`] so both can be replaced in tests.

pub mod backend;
pub mod book;
pub mod channel;
pub mod error;
pub mod events;
pub mod sync;
pub mod types;

#[cfg(test)]
mod test_helpers;

pub use backend::{ChatBackend, ConfirmReceipt, ContactOutcome, HttpBackend, NewGroup};
pub use book::ConversationBook;
pub use channel::{ChannelKind, ChannelState, Connector, WsConnector};
pub use error::{Result, SyncError};
pub use sync::{Alert, SyncSettings, SyncUpdate, Synchronizer};
pub use types::{ContentRules, Group, MemberProfile, Message, MessageKind};
