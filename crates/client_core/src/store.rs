//! Rendered message list for one chat view.
//!
//! All mutations go through [`ChatState::apply`], which enforces the
//! per-message lifecycle: an id becomes present through a confirmed send or a
//! posted broadcast (whichever lands first), may be edited in place any number
//! of times, and is gone for good once deleted. Repeated inserts and deletes of
//! absent ids are no-ops.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ClientNonce, MessageId},
    protocol::{MessageAuthor, MessageEvent, MessagePayload},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub nonce: ClientNonce,
    pub content: String,
    pub author: MessageAuthor,
    pub queued_at: DateTime<Utc>,
}

impl PendingMessage {
    pub fn new(content: impl Into<String>, author: MessageAuthor) -> Self {
        Self {
            nonce: ClientNonce::generate(),
            content: content.into(),
            author,
            queued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEntry {
    Pending(PendingMessage),
    Confirmed(MessagePayload),
}

impl ChatEntry {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(message) => Some(message.id),
        }
    }

    pub fn nonce(&self) -> Option<ClientNonce> {
        match self {
            Self::Pending(pending) => Some(pending.nonce),
            Self::Confirmed(_) => None,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Pending(pending) => &pending.content,
            Self::Confirmed(message) => &message.content,
        }
    }

    pub fn author(&self) -> &MessageAuthor {
        match self {
            Self::Pending(pending) => &pending.author,
            Self::Confirmed(message) => &message.user,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// Identifies a dropdown/context menu; at most one is open per view.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MenuId(pub String);

impl MenuId {
    pub fn message(message_id: MessageId) -> Self {
        Self(format!("message-{}", message_id.0))
    }
}

#[derive(Debug, Clone)]
pub enum ChatAction {
    QueuePending(PendingMessage),
    ConfirmSend {
        nonce: ClientNonce,
        message: MessagePayload,
    },
    DiscardPending {
        nonce: ClientNonce,
    },
    Remote(MessageEvent),
    /// A page of older messages, oldest first.
    HistoryLoaded(Vec<MessagePayload>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Inserted,
    /// A pending entry was replaced in place by its authoritative message.
    Confirmed,
    /// The message was already present; only the pending marker was dropped.
    Deduplicated,
    Updated,
    Removed,
    Ignored,
}

impl Applied {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    entries: Vec<ChatEntry>,
    deleted: HashSet<MessageId>,
    active_menu: Option<MenuId>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position_of(&self, message_id: MessageId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.message_id() == Some(message_id))
    }

    pub fn message(&self, message_id: MessageId) -> Option<&MessagePayload> {
        self.entries.iter().find_map(|entry| match entry {
            ChatEntry::Confirmed(message) if message.id == message_id => Some(message),
            _ => None,
        })
    }

    pub fn occurrences(&self, message_id: MessageId) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.message_id() == Some(message_id))
            .count()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingMessage> {
        self.entries.iter().filter_map(|entry| match entry {
            ChatEntry::Pending(pending) => Some(pending),
            ChatEntry::Confirmed(_) => None,
        })
    }

    pub fn oldest_message_id(&self) -> Option<MessageId> {
        self.entries.iter().find_map(ChatEntry::message_id)
    }

    pub fn was_deleted(&self, message_id: MessageId) -> bool {
        self.deleted.contains(&message_id)
    }

    pub fn active_menu(&self) -> Option<&MenuId> {
        self.active_menu.as_ref()
    }

    /// Opens `menu`, closing whichever menu was open; closes it if it already was.
    pub fn toggle_menu(&mut self, menu: MenuId) -> Option<&MenuId> {
        if self.active_menu.as_ref() == Some(&menu) {
            self.active_menu = None;
        } else {
            self.active_menu = Some(menu);
        }
        self.active_menu.as_ref()
    }

    pub fn close_menu(&mut self) {
        self.active_menu = None;
    }

    pub fn apply(&mut self, action: ChatAction) -> Applied {
        match action {
            ChatAction::QueuePending(pending) => {
                if self.pending_position(pending.nonce).is_some() {
                    return Applied::Ignored;
                }
                self.entries.push(ChatEntry::Pending(pending));
                Applied::Inserted
            }
            ChatAction::ConfirmSend { nonce, message } => self.confirm_send(nonce, message),
            ChatAction::DiscardPending { nonce } => match self.pending_position(nonce) {
                Some(index) => {
                    self.entries.remove(index);
                    Applied::Removed
                }
                None => Applied::Ignored,
            },
            ChatAction::Remote(MessageEvent::Posted(message)) => {
                if self.is_known(message.id) {
                    return Applied::Ignored;
                }
                self.entries.push(ChatEntry::Confirmed(message));
                Applied::Inserted
            }
            ChatAction::Remote(MessageEvent::Edited(edited)) => self.edit_in_place(edited),
            ChatAction::Remote(MessageEvent::Deleted { message_id }) => self.remove(message_id),
            ChatAction::HistoryLoaded(messages) => self.prepend_history(messages),
        }
    }

    fn is_known(&self, message_id: MessageId) -> bool {
        self.deleted.contains(&message_id) || self.position_of(message_id).is_some()
    }

    fn pending_position(&self, nonce: ClientNonce) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.nonce() == Some(nonce))
    }

    fn confirm_send(&mut self, nonce: ClientNonce, message: MessagePayload) -> Applied {
        let slot = self.pending_position(nonce);
        if self.is_known(message.id) {
            return match slot {
                Some(index) => {
                    self.entries.remove(index);
                    Applied::Deduplicated
                }
                None => Applied::Ignored,
            };
        }
        match slot {
            Some(index) => {
                self.entries[index] = ChatEntry::Confirmed(message);
                Applied::Confirmed
            }
            None => {
                self.entries.push(ChatEntry::Confirmed(message));
                Applied::Inserted
            }
        }
    }

    fn edit_in_place(&mut self, edited: MessagePayload) -> Applied {
        let Some(index) = self.position_of(edited.id) else {
            return Applied::Ignored;
        };
        if let ChatEntry::Confirmed(message) = &mut self.entries[index] {
            message.content = edited.content;
            message.is_edited = true;
        }
        Applied::Updated
    }

    fn remove(&mut self, message_id: MessageId) -> Applied {
        let Some(index) = self.position_of(message_id) else {
            return Applied::Ignored;
        };
        self.entries.remove(index);
        self.deleted.insert(message_id);
        if self.active_menu.as_ref() == Some(&MenuId::message(message_id)) {
            self.active_menu = None;
        }
        Applied::Removed
    }

    fn prepend_history(&mut self, messages: Vec<MessagePayload>) -> Applied {
        let mut seen = HashSet::new();
        let older: Vec<ChatEntry> = messages
            .into_iter()
            .filter(|message| !self.is_known(message.id) && seen.insert(message.id))
            .map(ChatEntry::Confirmed)
            .collect();
        if older.is_empty() {
            return Applied::Ignored;
        }
        self.entries.splice(0..0, older);
        Applied::Inserted
    }
}

/// Pure form of [`ChatState::apply`].
pub fn reduce(mut state: ChatState, action: ChatAction) -> ChatState {
    state.apply(action);
    state
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
