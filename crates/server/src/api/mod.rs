//! In-memory message book behind the relay's REST routes.
//!
//! Each call validates the request, applies it, and returns the authoritative
//! record; the HTTP layer publishes the matching broadcast event.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use chrono::{Duration, Utc};
use shared::{
    domain::{ChannelId, MessageId, ServerId, UserId},
    error::ApiError,
    protocol::{LobbyClear, LobbyRequest, LobbyUpdate, MessageAuthor, MessagePayload, ProfileRequest},
};
use tokio::sync::RwLock;

const MAX_DISPLAY_NAME_CHARS: usize = 64;
const MAX_LOBBY_LINK_CHARS: usize = 512;

#[derive(Debug, Clone)]
struct StoredMessage {
    server_id: ServerId,
    channel_id: ChannelId,
    payload: MessagePayload,
}

#[derive(Debug, Default)]
struct MessageBook {
    last_message_id: i64,
    messages: BTreeMap<MessageId, StoredMessage>,
    profiles: HashMap<UserId, MessageAuthor>,
}

impl MessageBook {
    fn author(&self, user_id: UserId) -> MessageAuthor {
        self.profiles
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| MessageAuthor {
                id: user_id,
                display_name: format!("User {}", user_id.0),
                avatar_url: None,
            })
    }

    /// The caller's own message in this channel, or the reason it can't be touched.
    fn owned_message_mut(
        &mut self,
        user_id: UserId,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<&mut StoredMessage, ApiError> {
        let stored = self
            .messages
            .get_mut(&message_id)
            .filter(|stored| stored.server_id == server_id && stored.channel_id == channel_id)
            .ok_or_else(|| ApiError::not_found("message not found"))?;
        if stored.payload.user.id != user_id {
            return Err(ApiError::forbidden("you can only change your own messages"));
        }
        Ok(stored)
    }
}

#[derive(Clone)]
pub struct ApiContext {
    book: Arc<RwLock<MessageBook>>,
    pub max_message_chars: usize,
    pub history_page_limit: u32,
}

impl ApiContext {
    pub fn new(max_message_chars: usize, history_page_limit: u32) -> Self {
        Self {
            book: Arc::new(RwLock::new(MessageBook::default())),
            max_message_chars,
            history_page_limit: history_page_limit.max(1),
        }
    }

    fn validate_content(&self, content: &str) -> Result<String, ApiError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::validation("message content cannot be empty"));
        }
        if content.chars().count() > self.max_message_chars {
            return Err(ApiError::validation(format!(
                "message exceeds {} characters",
                self.max_message_chars
            )));
        }
        Ok(content.to_string())
    }
}

pub async fn set_profile(
    ctx: &ApiContext,
    user_id: UserId,
    request: ProfileRequest,
) -> Result<MessageAuthor, ApiError> {
    let display_name = request.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::validation("display name cannot be empty"));
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_CHARS {
        return Err(ApiError::validation(format!(
            "display name exceeds {MAX_DISPLAY_NAME_CHARS} characters"
        )));
    }
    let profile = MessageAuthor {
        id: user_id,
        display_name: display_name.to_string(),
        avatar_url: request
            .avatar_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty()),
    };
    ctx.book
        .write()
        .await
        .profiles
        .insert(user_id, profile.clone());
    Ok(profile)
}

pub async fn post_message(
    ctx: &ApiContext,
    user_id: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
    content: &str,
) -> Result<MessagePayload, ApiError> {
    let content = ctx.validate_content(content)?;
    let mut book = ctx.book.write().await;
    book.last_message_id += 1;
    let payload = MessagePayload {
        id: MessageId(book.last_message_id),
        content,
        created_at: Utc::now(),
        is_edited: false,
        user: book.author(user_id),
    };
    book.messages.insert(
        payload.id,
        StoredMessage {
            server_id,
            channel_id,
            payload: payload.clone(),
        },
    );
    Ok(payload)
}

pub async fn edit_message(
    ctx: &ApiContext,
    user_id: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
    message_id: MessageId,
    content: &str,
) -> Result<MessagePayload, ApiError> {
    let content = ctx.validate_content(content)?;
    let mut book = ctx.book.write().await;
    let stored = book.owned_message_mut(user_id, server_id, channel_id, message_id)?;
    stored.payload.content = content;
    stored.payload.is_edited = true;
    Ok(stored.payload.clone())
}

pub async fn delete_message(
    ctx: &ApiContext,
    user_id: UserId,
    server_id: ServerId,
    channel_id: ChannelId,
    message_id: MessageId,
) -> Result<MessageId, ApiError> {
    let mut book = ctx.book.write().await;
    book.owned_message_mut(user_id, server_id, channel_id, message_id)?;
    book.messages.remove(&message_id);
    Ok(message_id)
}

/// Up to `limit` messages older than `before`, oldest first.
pub async fn list_messages(
    ctx: &ApiContext,
    server_id: ServerId,
    channel_id: ChannelId,
    limit: Option<u32>,
    before: Option<MessageId>,
) -> Result<Vec<MessagePayload>, ApiError> {
    let limit = limit
        .unwrap_or(ctx.history_page_limit)
        .clamp(1, ctx.history_page_limit) as usize;
    let book = ctx.book.read().await;
    let upper = before.unwrap_or(MessageId(i64::MAX));
    let mut page: Vec<MessagePayload> = book
        .messages
        .range(..upper)
        .rev()
        .filter(|(_, stored)| stored.server_id == server_id && stored.channel_id == channel_id)
        .take(limit)
        .map(|(_, stored)| stored.payload.clone())
        .collect();
    page.reverse();
    Ok(page)
}

pub async fn set_lobby(
    ctx: &ApiContext,
    user_id: UserId,
    request: LobbyRequest,
) -> Result<LobbyUpdate, ApiError> {
    let lobby_link = request.lobby_link.trim();
    if lobby_link.is_empty() {
        return Err(ApiError::validation("lobby link cannot be empty"));
    }
    if lobby_link.chars().count() > MAX_LOBBY_LINK_CHARS {
        return Err(ApiError::validation("lobby link is too long"));
    }
    let expires_at = match request.expires_in_secs {
        Some(0) => return Err(ApiError::validation("lobby expiry must be in the future")),
        Some(secs) => {
            let secs = i64::try_from(secs)
                .map_err(|_| ApiError::validation("lobby expiry is too far away"))?;
            let after = Duration::try_seconds(secs)
                .ok_or_else(|| ApiError::validation("lobby expiry is too far away"))?;
            Some(
                Utc::now()
                    .checked_add_signed(after)
                    .ok_or_else(|| ApiError::validation("lobby expiry is too far away"))?,
            )
        }
        None => None,
    };
    let author = ctx.book.read().await.author(user_id);
    Ok(LobbyUpdate {
        user_id,
        lobby_link: Some(lobby_link.to_string()),
        display_name: Some(author.display_name),
        expires_at,
    })
}

pub async fn clear_lobby(ctx: &ApiContext, user_id: UserId) -> LobbyClear {
    let author = ctx.book.read().await.author(user_id);
    LobbyClear {
        user_id,
        display_name: Some(author.display_name),
    }
}

#[cfg(test)]
#[path = "tests/mod_tests.rs"]
mod tests;
