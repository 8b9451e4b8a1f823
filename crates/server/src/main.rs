use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::{ChannelId, MessageId, ServerId, UserId},
    error::{ApiError, ErrorCode},
    protocol::{
        ChannelTopic, DeleteMessageResponse, ListMessagesQuery, LobbyRequest,
        MessageContentRequest, MessageEvent, MessagePayload, MessageResponse, PresenceEvent,
        ProfileRequest, TopicEvent,
    },
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod hub;

use api::{
    clear_lobby, delete_message, edit_message, list_messages, post_message, set_lobby, set_profile,
};
use app_state::AppState;
use config::load_settings;

#[derive(Debug, Deserialize)]
struct UserQuery {
    user_id: i64,
}

/// Relay failures as `{success:false, error}` with a status matching the code.
struct HttpError(ApiError);

impl From<ApiError> for HttpError {
    fn from(err: ApiError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match self.0.code {
            ErrorCode::Validation => StatusCode::BAD_REQUEST,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
        };
        let body = json!({
            "success": false,
            "error": self.0.message,
            "code": self.0.code,
        });
        (status, Json(body)).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let state = AppState::new(&settings);
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings
        .server_bind
        .parse()
        .with_context(|| format!("invalid bind address '{}'", settings.server_bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "relay listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/users/me", put(http_set_profile))
        .route(
            "/servers/:server_id/channels/:channel_id/messages",
            get(http_list_messages).post(http_post_message),
        )
        .route(
            "/servers/:server_id/channels/:channel_id/messages/:message_id",
            put(http_edit_message).delete(http_delete_message),
        )
        .route(
            "/servers/:server_id/lobby",
            put(http_set_lobby).delete(http_clear_lobby),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_set_profile(
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
    Json(req): Json<ProfileRequest>,
) -> Result<StatusCode, HttpError> {
    let profile = set_profile(&state.api, UserId(q.user_id), req).await?;
    info!(user_id = q.user_id, display_name = %profile.display_name, "profile updated");
    Ok(StatusCode::NO_CONTENT)
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    Path((server_id, channel_id)): Path<(i64, i64)>,
    Query(q): Query<ListMessagesQuery>,
) -> Result<Json<Vec<MessagePayload>>, HttpError> {
    let messages = list_messages(
        &state.api,
        ServerId(server_id),
        ChannelId(channel_id),
        q.limit,
        q.before.map(MessageId),
    )
    .await?;
    Ok(Json(messages))
}

async fn http_post_message(
    State(state): State<Arc<AppState>>,
    Path((server_id, channel_id)): Path<(i64, i64)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MessageContentRequest>,
) -> Result<Json<MessageResponse>, HttpError> {
    let (server_id, channel_id) = (ServerId(server_id), ChannelId(channel_id));
    let message = post_message(
        &state.api,
        UserId(q.user_id),
        server_id,
        channel_id,
        &req.content,
    )
    .await?;
    let receivers = state.hub.publish(
        ChannelTopic::Channel(server_id, channel_id),
        TopicEvent::Message(MessageEvent::Posted(message.clone())),
    );
    info!(message_id = message.id.0, user_id = q.user_id, receivers, "message posted");
    Ok(Json(MessageResponse::ok(message)))
}

async fn http_edit_message(
    State(state): State<Arc<AppState>>,
    Path((server_id, channel_id, message_id)): Path<(i64, i64, i64)>,
    Query(q): Query<UserQuery>,
    Json(req): Json<MessageContentRequest>,
) -> Result<Json<MessageResponse>, HttpError> {
    let (server_id, channel_id) = (ServerId(server_id), ChannelId(channel_id));
    let message = edit_message(
        &state.api,
        UserId(q.user_id),
        server_id,
        channel_id,
        MessageId(message_id),
        &req.content,
    )
    .await?;
    state.hub.publish(
        ChannelTopic::Channel(server_id, channel_id),
        TopicEvent::Message(MessageEvent::Edited(message.clone())),
    );
    info!(message_id, user_id = q.user_id, "message edited");
    Ok(Json(MessageResponse::ok(message)))
}

async fn http_delete_message(
    State(state): State<Arc<AppState>>,
    Path((server_id, channel_id, message_id)): Path<(i64, i64, i64)>,
    Query(q): Query<UserQuery>,
) -> Result<Json<DeleteMessageResponse>, HttpError> {
    let (server_id, channel_id) = (ServerId(server_id), ChannelId(channel_id));
    let message_id = delete_message(
        &state.api,
        UserId(q.user_id),
        server_id,
        channel_id,
        MessageId(message_id),
    )
    .await?;
    state.hub.publish(
        ChannelTopic::Channel(server_id, channel_id),
        TopicEvent::Message(MessageEvent::Deleted { message_id }),
    );
    info!(message_id = message_id.0, user_id = q.user_id, "message deleted");
    Ok(Json(DeleteMessageResponse::ok(message_id)))
}

async fn http_set_lobby(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<i64>,
    Query(q): Query<UserQuery>,
    Json(req): Json<LobbyRequest>,
) -> Result<StatusCode, HttpError> {
    let update = set_lobby(&state.api, UserId(q.user_id), req).await?;
    state.hub.publish(
        ChannelTopic::Server(ServerId(server_id)),
        TopicEvent::Presence(PresenceEvent::LobbyUpdated(update)),
    );
    info!(server_id, user_id = q.user_id, "lobby opened");
    Ok(StatusCode::NO_CONTENT)
}

async fn http_clear_lobby(
    State(state): State<Arc<AppState>>,
    Path(server_id): Path<i64>,
    Query(q): Query<UserQuery>,
) -> StatusCode {
    let clear = clear_lobby(&state.api, UserId(q.user_id)).await;
    state.hub.publish(
        ChannelTopic::Server(ServerId(server_id)),
        TopicEvent::Presence(PresenceEvent::LobbyCleared(clear)),
    );
    info!(server_id, user_id = q.user_id, "lobby closed");
    StatusCode::NO_CONTENT
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<UserQuery>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| hub::serve_connection(hub, socket, UserId(q.user_id)))
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
