//! In-memory conversation state.
//!
//! [`ConversationBook`] holds the conversation list, the active selection and
//! the member profile cache. It performs no I/O; the synchronizer feeds it the
//! results of pulls and pushes. Every mutation leaves the list sorted by
//! descending last activity.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::types::{Group, MemberProfile, Message, UNKNOWN_CONTACT, encode_member_key};

#[derive(Debug, Clone)]
pub struct ConversationBook {
    me: String,
    me_key: String,
    groups: Vec<Group>,
    active: Option<String>,
    profiles: HashMap<String, MemberProfile>,
}

impl ConversationBook {
    pub fn new(me: impl Into<String>) -> Self {
        let me = me.into();
        Self {
            me_key: encode_member_key(&me),
            me,
            groups: Vec::new(),
            active: None,
            profiles: HashMap::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn get(&self, group_id: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.id == group_id)
    }

    fn get_mut(&mut self, group_id: &str) -> Option<&mut Group> {
        self.groups.iter_mut().find(|g| g.id == group_id)
    }

    pub fn contains(&self, group_id: &str) -> bool {
        self.get(group_id).is_some()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn set_active(&mut self, group_id: Option<String>) {
        self.active = group_id;
    }

    pub fn is_active(&self, group_id: &str) -> bool {
        self.active.as_deref() == Some(group_id)
    }

    fn resort(&mut self) {
        // Stable: equal timestamps keep their relative order.
        self.groups.sort_by(|a, b| b.activity().cmp(&a.activity()));
    }

    /// Replace the list with a fresh pull, keeping message sequences already
    /// held for conversations that are still present.
    pub fn replace_groups(&mut self, groups: Vec<Group>) {
        let mut held: HashMap<String, Vec<Message>> = self
            .groups
            .drain(..)
            .map(|g| (g.id, g.messages))
            .collect();
        self.groups = groups
            .into_iter()
            .map(|mut g| {
                if g.messages.is_empty() {
                    if let Some(messages) = held.remove(&g.id) {
                        g.messages = messages;
                    }
                }
                g
            })
            .collect();
        self.resort();
    }

    /// Insert a conversation at the head of the list unless its id is known.
    pub fn insert_group(&mut self, group: Group) -> bool {
        if self.contains(&group.id) {
            return false;
        }
        self.groups.insert(0, group);
        self.resort();
        true
    }

    /// Replace a conversation's message sequence with pulled history.
    pub fn set_history(&mut self, group_id: &str, messages: Vec<Message>) -> bool {
        let Some(group) = self.get_mut(group_id) else {
            return false;
        };
        group.messages = messages;
        true
    }

    /// Append a message to its conversation and advance last activity.
    pub fn append_message(&mut self, message: Message) -> bool {
        let Some(group) = self.get_mut(&message.group_id) else {
            return false;
        };
        group.touch(message.timestamp);
        group.messages.push(message);
        self.resort();
        true
    }

    /// Advance a conversation's last activity without a message body.
    pub fn touch(&mut self, group_id: &str, ts: DateTime<Utc>) -> bool {
        let Some(group) = self.get_mut(group_id) else {
            return false;
        };
        let moved = group.touch(ts);
        if moved {
            self.resort();
        }
        moved
    }

    /// Mirror a read marker for the local member.
    pub fn mark_read(&mut self, group_id: &str, ts: DateTime<Utc>) -> bool {
        let key = self.me_key.clone();
        let Some(group) = self.get_mut(group_id) else {
            return false;
        };
        group.read_status.set(key, ts);
        true
    }

    /// Record a trade confirmation answered for `role` ("buyer" or "seller").
    pub fn set_confirmation(&mut self, group_id: &str, role: &str, confirmed: bool) -> bool {
        let Some(group) = self.get_mut(group_id) else {
            return false;
        };
        match role {
            "buyer" => group.buyer_confirmed = confirmed,
            "seller" => group.seller_confirmed = confirmed,
            _ => return false,
        }
        true
    }

    /// Unread means a newer message than my marker, outside the active conversation.
    pub fn is_unread(&self, group: &Group) -> bool {
        !self.is_active(&group.id) && group.has_unread(&self.me_key)
    }

    pub fn unread_count(&self) -> usize {
        self.groups.iter().filter(|g| self.is_unread(g)).count()
    }

    /// Distinct members other than me across `groups`, in first-seen order.
    pub fn other_members<'a>(&self, groups: impl IntoIterator<Item = &'a Group>) -> Vec<String> {
        let mut seen = Vec::new();
        for group in groups {
            for member in group.other_members(&self.me) {
                if !seen.iter().any(|s: &String| s == member) {
                    seen.push(member.to_string());
                }
            }
        }
        seen
    }

    pub fn cache_profile(&mut self, email: impl Into<String>, profile: MemberProfile) {
        self.profiles.insert(email.into(), profile);
    }

    pub fn profile(&self, email: &str) -> Option<&MemberProfile> {
        self.profiles.get(email)
    }

    /// Name shown next to a conversation: its first counterpart's display name.
    pub fn counterpart_name(&self, group: &Group) -> String {
        group
            .counterpart(&self.me)
            .and_then(|email| self.profile(email))
            .map(MemberProfile::display_name)
            .unwrap_or_else(|| UNKNOWN_CONTACT.to_string())
    }

    /// Short label for a message sender.
    pub fn sender_label(&self, email: &str) -> String {
        if email == self.me {
            return "you".to_string();
        }
        match self.profile(email) {
            Some(profile) => profile.handle(email),
            None => email.to_string(),
        }
    }
}
