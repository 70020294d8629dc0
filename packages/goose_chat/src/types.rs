use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use uuid::Uuid;

/// Label used when a counterpart has no resolvable profile.
pub const UNKNOWN_CONTACT: &str = "unknown contact";

/// Media host that uploaded chat images are served from.
pub const DEFAULT_MEDIA_PREFIX: &str = "https://goosenest.s3.ap-southeast-2.amazonaws.com/";

/// Sentinel content posted into a conversation when a trade is confirmed.
pub const DEFAULT_CONFIRM_MESSAGE: &str = "Confirmed: use the GooseNest central trading system";

/// Sanitize a member identity for use as a read-marker key.
///
/// The backend stores markers in a document map, so `.` and `$` are spelled out.
pub fn encode_member_key(email: &str) -> String {
    email.replace('.', "_dot_").replace('$', "_dollar_")
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Wire format for outgoing timestamps: millisecond precision, `Z` suffix.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Required RFC 3339 timestamp.
mod wire_time {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format_timestamp(*ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp {raw:?}")))
    }
}

/// Optional timestamp; empty or unparseable strings read as absent.
mod lenient_time {
    use super::*;

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_str(&format_timestamp(*ts)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw = Option::<String>::deserialize(d)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}

/// Per-member last-read timestamps, keyed by [`encode_member_key`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadMarkers(HashMap<String, DateTime<Utc>>);

impl ReadMarkers {
    pub fn get(&self, key: &str) -> Option<DateTime<Utc>> {
        self.0.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, ts: DateTime<Utc>) {
        self.0.insert(key.into(), ts);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for ReadMarkers {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let as_strings: HashMap<&str, String> = self
            .0
            .iter()
            .map(|(k, v)| (k.as_str(), format_timestamp(*v)))
            .collect();
        as_strings.serialize(s)
    }
}

impl<'de> Deserialize<'de> for ReadMarkers {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = Option::<HashMap<String, String>>::deserialize(d)?.unwrap_or_default();
        Ok(Self(
            raw.into_iter()
                .filter_map(|(k, v)| parse_timestamp(&v).map(|ts| (k, ts)))
                .collect(),
        ))
    }
}

/// A conversation between a buyer and a seller about one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub members: Vec<String>,
    #[serde(default)]
    pub product_id: String,
    #[serde(default)]
    pub cover_image: String,
    #[serde(default, with = "lenient_time")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "lenient_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub read_status: ReadMarkers,
    #[serde(default)]
    pub buyer: String,
    #[serde(default)]
    pub seller: String,
    #[serde(default)]
    pub buyer_confirmed: bool,
    #[serde(default)]
    pub seller_confirmed: bool,
    /// Loaded history plus live arrivals. Never part of the list payload.
    #[serde(skip)]
    pub messages: Vec<Message>,
}

impl Group {
    /// Ordering key for the conversation list.
    pub fn activity(&self) -> Option<DateTime<Utc>> {
        self.last_message_at.or(self.created_at)
    }

    /// Advance last activity to `ts` unless it is already later.
    pub fn touch(&mut self, ts: DateTime<Utc>) -> bool {
        if self.last_message_at.is_none_or(|current| ts > current) {
            self.last_message_at = Some(ts);
            true
        } else {
            false
        }
    }

    pub fn other_members<'a>(&'a self, me: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.members
            .iter()
            .map(String::as_str)
            .filter(move |m| *m != me)
    }

    /// The first member that is not `me`.
    pub fn counterpart<'a>(&'a self, me: &'a str) -> Option<&'a str> {
        self.other_members(me).next()
    }

    pub fn is_member(&self, email: &str) -> bool {
        self.members.iter().any(|m| m == email)
    }

    /// Whether the last message is newer than the member's read marker.
    pub fn has_unread(&self, member_key: &str) -> bool {
        match (self.last_message_at, self.read_status.get(member_key)) {
            (Some(last), Some(read)) => last > read,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

/// One chat message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub group_id: String,
    #[serde(rename = "senderEmail", default)]
    pub sender_email: String,
    #[serde(default)]
    pub content: String,
    #[serde(with = "wire_time")]
    pub timestamp: DateTime<Utc>,
    /// Set on optimistic local copies of outgoing messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
}

impl Message {
    pub fn outgoing(
        group_id: impl Into<String>,
        sender_email: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            group_id: group_id.into(),
            sender_email: sender_email.into(),
            content: content.into(),
            timestamp,
            client_id: Some(Uuid::new_v4()),
        }
    }

    pub fn is_local(&self) -> bool {
        self.client_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
    Confirmation,
}

/// How message content is classified for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRules {
    pub media_prefix: String,
    pub confirm_message: String,
}

impl Default for ContentRules {
    fn default() -> Self {
        Self {
            media_prefix: DEFAULT_MEDIA_PREFIX.to_string(),
            confirm_message: DEFAULT_CONFIRM_MESSAGE.to_string(),
        }
    }
}

impl ContentRules {
    pub fn classify(&self, content: &str) -> MessageKind {
        if !self.media_prefix.is_empty() && content.starts_with(&self.media_prefix) {
            MessageKind::Image
        } else if content == self.confirm_message {
            MessageKind::Confirmation
        } else {
            MessageKind::Text
        }
    }
}

/// Public profile of a marketplace member, as served by `/user/profile/{email}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MemberProfile {
    #[serde(rename = "ID", default)]
    pub id: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub name_store: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub games: Vec<String>,
}

impl MemberProfile {
    fn full_name(&self) -> Option<String> {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        (!full.is_empty()).then(|| full.to_string())
    }

    /// Store name, else "first last", else [`UNKNOWN_CONTACT`].
    pub fn display_name(&self) -> String {
        if !self.name_store.trim().is_empty() {
            return self.name_store.trim().to_string();
        }
        self.full_name()
            .unwrap_or_else(|| UNKNOWN_CONTACT.to_string())
    }

    /// Username, else store name, else "first last", else `fallback`.
    pub fn handle(&self, fallback: &str) -> String {
        [&self.username, &self.name_store]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| self.full_name())
            .unwrap_or_else(|| fallback.to_string())
    }
}
