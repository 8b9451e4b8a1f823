use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{ChannelId, MessageId, ServerId, UserId};

pub mod events {
    pub const MESSAGE_POSTED: &str = "message.posted";
    pub const MESSAGE_EDITED: &str = "message.edited";
    pub const MESSAGE_DELETED: &str = "message.deleted";
    pub const LOBBY_UPDATED: &str = "user.lobby.updated";
    pub const LOBBY_CLEARED: &str = "user.lobby.cleared";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub id: UserId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_edited: bool,
    pub user: MessageAuthor,
}

/// Body of both the send and the edit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageContentRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageResponse {
    pub fn ok(message: MessagePayload) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeleteMessageResponse {
    pub fn ok(message_id: MessageId) -> Self {
        Self {
            success: true,
            message_id: Some(message_id),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListMessagesQuery {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyRequest {
    pub lobby_link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in_secs: Option<u64>,
}

/// How the caller is shown next to their messages and lobby toasts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRequest {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A pub/sub subscription target, either server-wide or scoped to one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ChannelTopic {
    Server(ServerId),
    Channel(ServerId, ChannelId),
}

impl ChannelTopic {
    pub fn server_id(&self) -> ServerId {
        match self {
            Self::Server(server_id) | Self::Channel(server_id, _) => *server_id,
        }
    }

    pub fn is_channel_scoped(&self) -> bool {
        matches!(self, Self::Channel(..))
    }
}

impl fmt::Display for ChannelTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(server_id) => write!(f, "server.{server_id}"),
            Self::Channel(server_id, channel_id) => {
                write!(f, "server.{server_id}.channel.{channel_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid topic name: {0}")]
pub struct TopicParseError(pub String);

impl FromStr for ChannelTopic {
    type Err = TopicParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || TopicParseError(raw.to_string());
        let parts: Vec<&str> = raw.split('.').collect();
        match parts.as_slice() {
            ["server", server_id] => {
                let server_id = server_id.parse().map_err(|_| invalid())?;
                Ok(Self::Server(ServerId(server_id)))
            }
            ["server", server_id, "channel", channel_id] => {
                let server_id = server_id.parse().map_err(|_| invalid())?;
                let channel_id = channel_id.parse().map_err(|_| invalid())?;
                Ok(Self::Channel(ServerId(server_id), ChannelId(channel_id)))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ChannelTopic {
    type Error = TopicParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ChannelTopic> for String {
    fn from(value: ChannelTopic) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEvent {
    Posted(MessagePayload),
    Edited(MessagePayload),
    Deleted { message_id: MessageId },
}

impl MessageEvent {
    pub fn message_id(&self) -> MessageId {
        match self {
            Self::Posted(message) | Self::Edited(message) => message.id,
            Self::Deleted { message_id } => *message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyUpdate {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lobby_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyClear {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    LobbyUpdated(LobbyUpdate),
    LobbyCleared(LobbyClear),
}

impl PresenceEvent {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::LobbyUpdated(update) => update.user_id,
            Self::LobbyCleared(clear) => clear.user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicEvent {
    Message(MessageEvent),
    Presence(PresenceEvent),
}

#[derive(Serialize, Deserialize)]
struct MessageData {
    message: MessagePayload,
}

#[derive(Serialize, Deserialize)]
struct DeletedData {
    message_id: MessageId,
}

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("unknown broadcast event '{0}'")]
    UnknownEvent(String),
    #[error("event '{event}' is not valid on topic {topic}")]
    WrongTopic { event: String, topic: ChannelTopic },
    #[error("malformed '{event}' payload: {source}")]
    Payload {
        event: String,
        source: serde_json::Error,
    },
}

impl TopicEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message(MessageEvent::Posted(_)) => events::MESSAGE_POSTED,
            Self::Message(MessageEvent::Edited(_)) => events::MESSAGE_EDITED,
            Self::Message(MessageEvent::Deleted { .. }) => events::MESSAGE_DELETED,
            Self::Presence(PresenceEvent::LobbyUpdated(_)) => events::LOBBY_UPDATED,
            Self::Presence(PresenceEvent::LobbyCleared(_)) => events::LOBBY_CLEARED,
        }
    }

    /// Message events travel on channel topics, presence events on server topics.
    pub fn fits_topic(&self, topic: &ChannelTopic) -> bool {
        match self {
            Self::Message(_) => topic.is_channel_scoped(),
            Self::Presence(_) => !topic.is_channel_scoped(),
        }
    }

    pub fn into_envelope(
        self,
        topic: ChannelTopic,
    ) -> Result<BroadcastEnvelope, serde_json::Error> {
        let event = self.event_name().to_string();
        let data = match self {
            Self::Message(MessageEvent::Posted(message) | MessageEvent::Edited(message)) => {
                serde_json::to_value(MessageData { message })?
            }
            Self::Message(MessageEvent::Deleted { message_id }) => {
                serde_json::to_value(DeletedData { message_id })?
            }
            Self::Presence(PresenceEvent::LobbyUpdated(update)) => serde_json::to_value(update)?,
            Self::Presence(PresenceEvent::LobbyCleared(clear)) => serde_json::to_value(clear)?,
        };
        Ok(BroadcastEnvelope { topic, event, data })
    }

    pub fn from_envelope(envelope: &BroadcastEnvelope) -> Result<Self, EnvelopeError> {
        let payload_err = |source| EnvelopeError::Payload {
            event: envelope.event.clone(),
            source,
        };
        let data = envelope.data.clone();
        let event = match envelope.event.as_str() {
            events::MESSAGE_POSTED => {
                let data: MessageData = serde_json::from_value(data).map_err(payload_err)?;
                Self::Message(MessageEvent::Posted(data.message))
            }
            events::MESSAGE_EDITED => {
                let data: MessageData = serde_json::from_value(data).map_err(payload_err)?;
                Self::Message(MessageEvent::Edited(data.message))
            }
            events::MESSAGE_DELETED => {
                let data: DeletedData = serde_json::from_value(data).map_err(payload_err)?;
                Self::Message(MessageEvent::Deleted {
                    message_id: data.message_id,
                })
            }
            events::LOBBY_UPDATED => Self::Presence(PresenceEvent::LobbyUpdated(
                serde_json::from_value(data).map_err(payload_err)?,
            )),
            events::LOBBY_CLEARED => Self::Presence(PresenceEvent::LobbyCleared(
                serde_json::from_value(data).map_err(payload_err)?,
            )),
            other => return Err(EnvelopeError::UnknownEvent(other.to_string())),
        };

        if !event.fits_topic(&envelope.topic) {
            return Err(EnvelopeError::WrongTopic {
                event: envelope.event.clone(),
                topic: envelope.topic,
            });
        }
        Ok(event)
    }
}

/// Frame pushed from the server for one topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub topic: ChannelTopic,
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// Frames a websocket client sends to manage its topic set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientFrame {
    Subscribe { topic: ChannelTopic },
    Unsubscribe { topic: ChannelTopic },
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
