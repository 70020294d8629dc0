//! Plain-text rendering of conversations, messages and alerts.

use chrono::{DateTime, Utc};
use goose_chat::{Alert, ContentRules, ConversationBook, Group, Message, MessageKind};
use serde::Serialize;

/// Row of `nest groups --json`.
#[derive(Debug, Serialize)]
pub struct GroupSummary {
    pub id: String,
    pub name: String,
    pub counterpart: String,
    pub product_id: String,
    pub cover_image: String,
    pub unread: bool,
    pub last_message_at: Option<String>,
    pub buyer_confirmed: bool,
    pub seller_confirmed: bool,
}

impl GroupSummary {
    pub fn new(book: &ConversationBook, group: &Group) -> Self {
        Self {
            id: group.id.clone(),
            name: group.name.clone(),
            counterpart: book.counterpart_name(group),
            product_id: group.product_id.clone(),
            cover_image: group.cover_image.clone(),
            unread: book.is_unread(group),
            last_message_at: group
                .activity()
                .map(goose_chat::types::format_timestamp),
            buyer_confirmed: group.buyer_confirmed,
            seller_confirmed: group.seller_confirmed,
        }
    }
}

pub fn format_activity(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

pub fn group_header() -> String {
    format!(
        "  {:<26} {:<28} {:<20} {}",
        "ID", "LISTING", "WITH", "LAST ACTIVITY"
    )
}

/// One line of the conversation list; `*` marks unread, `>` the open one.
pub fn group_row(book: &ConversationBook, group: &Group) -> String {
    let marker = if book.is_active(&group.id) {
        '>'
    } else if book.is_unread(group) {
        '*'
    } else {
        ' '
    };
    format!(
        "{} {:<26} {:<28} {:<20} {}",
        marker,
        group.id,
        truncate(&group.name, 28),
        truncate(&book.counterpart_name(group), 20),
        format_activity(group.activity())
    )
}

pub fn message_body(rules: &ContentRules, content: &str) -> String {
    match rules.classify(content) {
        MessageKind::Text => content.to_string(),
        MessageKind::Image => format!("[image] {content}"),
        MessageKind::Confirmation => "[confirmed the central trading system]".to_string(),
    }
}

pub fn message_line(book: &ConversationBook, rules: &ContentRules, message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M"),
        book.sender_label(&message.sender_email),
        message_body(rules, &message.content)
    )
}

pub fn alert_line(alert: &Alert) -> String {
    format!(
        "[new message in {} ({}) at {}]",
        alert.name,
        alert.group_id,
        alert.timestamp.format("%H:%M")
    )
}
