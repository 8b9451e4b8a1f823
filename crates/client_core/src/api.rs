//! Request/response path for message mutations.
//!
//! Every call resolves to the authoritative [`MessagePayload`] (or id) the
//! server stored. Non-2xx responses and `{success:false}` bodies both surface
//! as errors so callers only deal with one failure shape.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Deserialize};
use shared::{
    domain::{ChannelId, MessageId, ServerId, UserId},
    protocol::{
        DeleteMessageResponse, ListMessagesQuery, LobbyRequest, MessageContentRequest,
        MessagePayload, MessageResponse, ProfileRequest,
    },
};
use url::Url;

use crate::error::{ClientError, Result};

#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn post_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<MessagePayload>;
    async fn edit_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessagePayload>;
    async fn delete_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MessageId>;
    async fn list_messages(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>>;
}

#[derive(Debug, Deserialize)]
struct FailureBody {
    #[serde(default)]
    error: Option<String>,
}

pub struct HttpMessageApi {
    http: Client,
    base_url: Url,
    user_id: UserId,
}

impl HttpMessageApi {
    pub fn new(server_url: &str, user_id: UserId) -> Result<Self> {
        let base_url = Url::parse(server_url)?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClientError::UnsupportedScheme(server_url.to_string()));
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            user_id,
        })
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    fn base(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn messages_url(&self, server_id: ServerId, channel_id: ChannelId) -> String {
        format!(
            "{}/servers/{}/channels/{}/messages",
            self.base(),
            server_id.0,
            channel_id.0
        )
    }

    fn message_url(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> String {
        format!(
            "{}/{}",
            self.messages_url(server_id, channel_id),
            message_id.0
        )
    }

    fn lobby_url(&self, server_id: ServerId) -> String {
        format!("{}/servers/{}/lobby", self.base(), server_id.0)
    }

    async fn execute<T: DeserializeOwned>(&self, url: String, request: RequestBuilder) -> Result<T> {
        let response = request
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await
            .map_err(|source| ClientError::Http {
                url: url.clone(),
                source,
            })?;
        let response = ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|source| ClientError::Http { url, source })
    }

    async fn expect_message(&self, url: String, request: RequestBuilder) -> Result<MessagePayload> {
        let body: MessageResponse = self.execute(url, request).await?;
        match body {
            MessageResponse {
                success: true,
                message: Some(message),
                ..
            } => Ok(message),
            MessageResponse { error, .. } => Err(ClientError::Rejected(
                error.unwrap_or_else(|| "response did not include a message".to_string()),
            )),
        }
    }

    /// Sends a body-less acknowledgement request, such as the lobby and profile calls.
    async fn acknowledge(&self, url: String, request: RequestBuilder) -> Result<()> {
        let response = request
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await
            .map_err(|source| ClientError::Http { url, source })?;
        ensure_success(response).await?;
        Ok(())
    }

    pub async fn set_profile(&self, display_name: &str, avatar_url: Option<&str>) -> Result<()> {
        let url = format!("{}/users/me", self.base());
        let request = self.http.put(&url).json(&ProfileRequest {
            display_name: display_name.to_string(),
            avatar_url: avatar_url.map(str::to_string),
        });
        self.acknowledge(url, request).await
    }

    pub async fn set_lobby(
        &self,
        server_id: ServerId,
        lobby_link: &str,
        expires_in_secs: Option<u64>,
    ) -> Result<()> {
        let url = self.lobby_url(server_id);
        let request = self.http.put(&url).json(&LobbyRequest {
            lobby_link: lobby_link.to_string(),
            expires_in_secs,
        });
        self.acknowledge(url, request).await
    }

    pub async fn clear_lobby(&self, server_id: ServerId) -> Result<()> {
        let url = self.lobby_url(server_id);
        let request = self.http.delete(&url);
        self.acknowledge(url, request).await
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<FailureBody>(&body)
        .ok()
        .and_then(|failure| failure.error)
        .unwrap_or_else(|| {
            if body.is_empty() {
                status.to_string()
            } else {
                body
            }
        });
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn post_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        content: &str,
    ) -> Result<MessagePayload> {
        let url = self.messages_url(server_id, channel_id);
        let request = self.http.post(&url).json(&MessageContentRequest {
            content: content.to_string(),
        });
        self.expect_message(url, request).await
    }

    async fn edit_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessagePayload> {
        let url = self.message_url(server_id, channel_id, message_id);
        let request = self.http.put(&url).json(&MessageContentRequest {
            content: content.to_string(),
        });
        self.expect_message(url, request).await
    }

    async fn delete_message(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        let url = self.message_url(server_id, channel_id, message_id);
        let request = self.http.delete(&url);
        let body: DeleteMessageResponse = self.execute(url, request).await?;
        if !body.success {
            return Err(ClientError::Rejected(
                body.error
                    .unwrap_or_else(|| "delete was not acknowledged".to_string()),
            ));
        }
        Ok(body.message_id.unwrap_or(message_id))
    }

    async fn list_messages(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>> {
        let url = self.messages_url(server_id, channel_id);
        let request = self.http.get(&url).query(&ListMessagesQuery {
            user_id: self.user_id.0,
            limit: Some(limit.clamp(1, 100)),
            before: before.map(|id| id.0),
        });
        let response = request.send().await.map_err(|source| ClientError::Http {
            url: url.clone(),
            source,
        })?;
        ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|source| ClientError::Http { url, source })
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
