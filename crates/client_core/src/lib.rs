//! Realtime chat view synchronization: topic subscriptions, optimistic sends
//! and id-based reconciliation of broadcast events.

use shared::domain::UserId;

pub mod api;
pub mod composer;
pub mod dispatch;
pub mod error;
pub mod presence;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod view;

pub use api::{HttpMessageApi, MessageApi};
pub use error::ClientError;
pub use presence::{LobbyBadge, LobbyBoard, Toast};
pub use store::{ChatAction, ChatEntry, ChatState, MenuId, PendingMessage};
pub use subscription::{SubscriptionHandle, SubscriptionManager};
pub use transport::{
    BroadcastTransport, InProcessTransport, MissingBroadcastTransport, WebSocketTransport,
};
pub use view::{ChatView, EditOutcome, SendOutcome, ViewOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    SendMessage,
    EditMessage,
    DeleteMessage,
    LoadHistory,
}

impl UserAction {
    pub fn label(self) -> &'static str {
        match self {
            Self::SendMessage => "send message",
            Self::EditMessage => "edit message",
            Self::DeleteMessage => "delete message",
            Self::LoadHistory => "load messages",
        }
    }
}

/// Notices a chat view emits for its renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessagesChanged,
    LobbyBadgeChanged { user_id: UserId },
    Toast(Toast),
    /// A blocking alert naming the action that failed.
    Alert { action: UserAction, message: String },
    ComposerReady,
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
