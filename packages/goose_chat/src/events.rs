//! Decoding of push channel payloads.
//!
//! The global channel carries both bare notifications and full message
//! envelopes; the creation channel carries new conversations; the active
//! channel carries message envelopes only. Payloads with an unrecognised
//! `type` decode to an `Ignored` variant rather than an error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::types::{Group, Message, format_timestamp, parse_timestamp};

pub const NEW_MESSAGE_NOTIFICATION: &str = "new_message_notification";
pub const NEW_GROUP_CREATED: &str = "new_group_created";

fn frame_type(value: &Value) -> Option<&str> {
    value.get("type").and_then(Value::as_str)
}

fn malformed(msg: impl std::fmt::Display) -> serde_json::Error {
    <serde_json::Error as serde::de::Error>::custom(msg)
}

/// Events on the process-wide notification channel.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalEvent {
    /// A message landed in `group_id`; the body is not included.
    Notification {
        group_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A full message envelope.
    Message(Message),
    Ignored(String),
}

#[derive(Deserialize)]
struct NotificationFrame {
    group_id: String,
    timestamp: String,
}

impl GlobalEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match frame_type(&value) {
            Some(NEW_MESSAGE_NOTIFICATION) => {
                let frame: NotificationFrame = serde_json::from_value(value)?;
                let timestamp = parse_timestamp(&frame.timestamp).ok_or_else(|| {
                    malformed(format!("invalid notification timestamp {:?}", frame.timestamp))
                })?;
                Ok(Self::Notification {
                    group_id: frame.group_id,
                    timestamp,
                })
            }
            Some(other) => Ok(Self::Ignored(other.to_string())),
            None => Ok(Self::Message(serde_json::from_value(value)?)),
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            Self::Notification { group_id, .. } => Some(group_id),
            Self::Message(msg) => Some(&msg.group_id),
            Self::Ignored(_) => None,
        }
    }
}

/// Events on the new-conversation channel.
#[derive(Debug, Clone, PartialEq)]
pub enum CreationEvent {
    GroupCreated(Group),
    Ignored(String),
}

#[derive(Deserialize)]
struct GroupCreatedFrame {
    group: Group,
}

impl CreationEvent {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        match frame_type(&value) {
            Some(NEW_GROUP_CREATED) => {
                let mut group = serde_json::from_value::<GroupCreatedFrame>(value)?.group;
                if group.last_message_at.is_none() {
                    group.last_message_at = group.created_at;
                }
                Ok(Self::GroupCreated(group))
            }
            Some(other) => Ok(Self::Ignored(other.to_string())),
            None => Ok(Self::Ignored(String::new())),
        }
    }
}

/// Decode a frame from the active-conversation channel.
pub fn parse_active(text: &str) -> Result<Message> {
    Ok(serde_json::from_str(text)?)
}

#[derive(Serialize)]
struct OutgoingFrame<'a> {
    content: &'a str,
    group_id: &'a str,
    timestamp: String,
    #[serde(rename = "senderEmail")]
    sender_email: &'a str,
}

/// Encode a message for the active-conversation channel. Local-only fields
/// are not sent.
pub fn encode_outgoing(message: &Message) -> Result<String> {
    Ok(serde_json::to_string(&OutgoingFrame {
        content: &message.content,
        group_id: &message.group_id,
        timestamp: format_timestamp(message.timestamp),
        sender_email: &message.sender_email,
    })?)
}
