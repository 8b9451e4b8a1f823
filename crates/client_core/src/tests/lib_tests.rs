use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::{http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use chrono::Utc;
use serde_json::json;
use shared::{
    domain::{ChannelId, MessageId, ServerId},
    protocol::{
        ChannelTopic, LobbyUpdate, MessageAuthor, MessageEvent, MessagePayload, PresenceEvent,
        TopicEvent,
    },
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, oneshot, Mutex},
};

use super::*;
use crate::error::Result;

const SERVER: ServerId = ServerId(11);
const CHANNEL: ChannelId = ChannelId(13);

fn viewer() -> MessageAuthor {
    author(7, "Nyx")
}

fn author(id: i64, name: &str) -> MessageAuthor {
    MessageAuthor {
        id: UserId(id),
        display_name: name.to_string(),
        avatar_url: None,
    }
}

fn payload(id: i64, content: &str, user: MessageAuthor) -> MessagePayload {
    MessagePayload {
        id: MessageId(id),
        content: content.to_string(),
        created_at: Utc::now(),
        is_edited: false,
        user,
    }
}

#[derive(Default)]
struct ApiScript {
    next_id: i64,
    post_gate: Option<oneshot::Receiver<()>>,
    fail_edits: bool,
    calls: Vec<&'static str>,
}

struct ScriptedApi {
    author: MessageAuthor,
    history: Vec<MessagePayload>,
    script: Mutex<ApiScript>,
}

impl ScriptedApi {
    fn new(history: Vec<MessagePayload>) -> Arc<Self> {
        Arc::new(Self {
            author: viewer(),
            history,
            script: Mutex::new(ApiScript {
                next_id: 42,
                ..ApiScript::default()
            }),
        })
    }

    async fn gate_posts(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.script.lock().await.post_gate = Some(rx);
        tx
    }

    async fn calls(&self) -> Vec<&'static str> {
        self.script.lock().await.calls.clone()
    }
}

#[async_trait]
impl MessageApi for ScriptedApi {
    async fn post_message(
        &self,
        _server_id: ServerId,
        _channel_id: ChannelId,
        content: &str,
    ) -> Result<MessagePayload> {
        let gate = {
            let mut script = self.script.lock().await;
            script.calls.push("post");
            script.post_gate.take()
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        let mut script = self.script.lock().await;
        let id = script.next_id;
        script.next_id += 1;
        Ok(payload(id, content, self.author.clone()))
    }

    async fn edit_message(
        &self,
        _server_id: ServerId,
        _channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> Result<MessagePayload> {
        let mut script = self.script.lock().await;
        script.calls.push("edit");
        if script.fail_edits {
            return Err(ClientError::Status {
                status: 500,
                message: "internal error".to_string(),
            });
        }
        let mut message = payload(message_id.0, content, self.author.clone());
        message.is_edited = true;
        Ok(message)
    }

    async fn delete_message(
        &self,
        _server_id: ServerId,
        _channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<MessageId> {
        self.script.lock().await.calls.push("delete");
        Ok(message_id)
    }

    async fn list_messages(
        &self,
        _server_id: ServerId,
        _channel_id: ChannelId,
        limit: u32,
        before: Option<MessageId>,
    ) -> Result<Vec<MessagePayload>> {
        self.script.lock().await.calls.push("list");
        let older: Vec<MessagePayload> = self
            .history
            .iter()
            .filter(|message| before.map_or(true, |before| message.id < before))
            .cloned()
            .collect();
        let skip = older.len().saturating_sub(limit as usize);
        Ok(older.into_iter().skip(skip).collect())
    }
}

async fn mount_view(
    transport: Arc<dyn BroadcastTransport>,
    api: Arc<dyn MessageApi>,
    options: ViewOptions,
) -> ChatView {
    let subscriptions = SubscriptionManager::new(transport);
    ChatView::mount(&subscriptions, api, SERVER, CHANNEL, options).await
}

async fn wait_until<F>(view: &ChatView, mut check: F)
where
    F: FnMut(&ChatState) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if check(&view.snapshot().await) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("view did not reach expected state");
}

async fn next_matching<F>(rx: &mut broadcast::Receiver<ClientEvent>, matches: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = rx.recv().await.expect("event");
            if matches(&event) {
                break event;
            }
        }
    })
    .await
    .expect("event timeout")
}

fn channel_topic() -> ChannelTopic {
    ChannelTopic::Channel(SERVER, CHANNEL)
}

fn posted(message: MessagePayload) -> TopicEvent {
    TopicEvent::Message(MessageEvent::Posted(message))
}

#[tokio::test]
async fn send_shows_pending_entry_then_confirms_with_server_id() {
    let transport = InProcessTransport::new(64);
    let api = ScriptedApi::new(Vec::new());
    let gate = api.gate_posts().await;
    let view = Arc::new(mount_view(transport, api.clone(), ViewOptions::new(viewer())).await);

    assert!(view.set_draft("gg well played").await);
    let sending = tokio::spawn({
        let view = Arc::clone(&view);
        async move { view.send_message().await }
    });

    wait_until(&view, |state| state.pending().count() == 1).await;
    let composer = view.composer().await;
    assert!(!composer.is_enabled());
    assert_eq!(composer.draft(), "");
    assert!(!view.set_draft("second message").await);

    let _ = gate.send(());
    let outcome = sending.await.expect("send task");

    assert_eq!(outcome, SendOutcome::Sent(MessageId(42)));
    let state = view.snapshot().await;
    assert_eq!(state.len(), 1);
    let entry = &state.entries()[0];
    assert!(!entry.is_pending());
    assert_eq!(entry.message_id(), Some(MessageId(42)));
    assert_eq!(entry.content(), "gg well played");
    let composer = view.composer().await;
    assert!(composer.is_enabled());
    assert!(composer.is_focused());
    assert_eq!(composer.draft(), "");
}

#[tokio::test]
async fn broadcast_echo_after_confirmation_is_not_duplicated() {
    let transport = InProcessTransport::new(64);
    let api = ScriptedApi::new(Vec::new());
    let view = mount_view(transport.clone(), api, ViewOptions::new(viewer())).await;

    view.set_draft("gg well played").await;
    assert_eq!(view.send_message().await, SendOutcome::Sent(MessageId(42)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    transport.publish(
        channel_topic(),
        posted(payload(42, "gg well played", viewer())),
    );
    transport.publish(channel_topic(), posted(payload(43, "nice", author(8, "Rook"))));

    wait_until(&view, |state| state.message(MessageId(43)).is_some()).await;
    let state = view.snapshot().await;
    assert_eq!(state.occurrences(MessageId(42)), 1);
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn broadcast_echo_before_confirmation_is_not_duplicated() {
    let transport = InProcessTransport::new(64);
    let api = ScriptedApi::new(Vec::new());
    let gate = api.gate_posts().await;
    let view = Arc::new(mount_view(transport.clone(), api.clone(), ViewOptions::new(viewer())).await);

    view.set_draft("gg well played").await;
    let sending = tokio::spawn({
        let view = Arc::clone(&view);
        async move { view.send_message().await }
    });
    wait_until(&view, |state| state.pending().count() == 1).await;

    transport.publish(
        channel_topic(),
        posted(payload(42, "gg well played", viewer())),
    );
    wait_until(&view, |state| state.message(MessageId(42)).is_some()).await;

    let _ = gate.send(());
    assert_eq!(
        sending.await.expect("send task"),
        SendOutcome::Sent(MessageId(42))
    );

    let state = view.snapshot().await;
    assert_eq!(state.occurrences(MessageId(42)), 1);
    assert_eq!(state.pending().count(), 0);
    assert_eq!(state.len(), 1);
}

async fn spawn_failing_server() -> String {
    async fn fail() -> impl IntoResponse {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"success": false, "error": "internal error"})),
        )
    }
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    let app = Router::new().route(
        "/servers/:server_id/channels/:channel_id/messages",
        post(fail),
    );
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn failed_send_alerts_and_reenables_input() {
    let server_url = spawn_failing_server().await;
    let api = Arc::new(HttpMessageApi::new(&server_url, UserId(7)).expect("api"));
    let view = mount_view(
        InProcessTransport::new(64),
        api,
        ViewOptions::new(viewer()),
    )
    .await;
    let mut rx = view.subscribe_events();

    view.set_draft("this will fail").await;
    assert_eq!(view.send_message().await, SendOutcome::Failed);

    let alert = next_matching(&mut rx, |event| matches!(event, ClientEvent::Alert { .. })).await;
    match alert {
        ClientEvent::Alert { action, message } => {
            assert_eq!(action, UserAction::SendMessage);
            assert!(message.contains("send message"), "unexpected alert: {message}");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    next_matching(&mut rx, |event| *event == ClientEvent::ComposerReady).await;

    let state = view.snapshot().await;
    assert!(state.is_empty());
    let composer = view.composer().await;
    assert!(composer.is_enabled());
    assert_eq!(composer.draft(), "");
}

#[tokio::test]
async fn blank_draft_makes_no_request() {
    let api = ScriptedApi::new(Vec::new());
    let view = mount_view(
        InProcessTransport::new(64),
        api.clone(),
        ViewOptions::new(viewer()),
    )
    .await;

    view.set_draft("   \n").await;
    assert_eq!(view.send_message().await, SendOutcome::Rejected);

    assert!(api.calls().await.is_empty());
    assert!(view.snapshot().await.is_empty());
    assert!(view.composer().await.is_enabled());
}

#[tokio::test]
async fn failed_edit_keeps_dialog_open_for_retry() {
    let history = vec![
        payload(3, "first", viewer()),
        payload(5, "tpyo", viewer()),
        payload(6, "third", author(8, "Rook")),
    ];
    let api = ScriptedApi::new(history);
    api.script.lock().await.fail_edits = true;
    let view = mount_view(
        InProcessTransport::new(64),
        api.clone(),
        ViewOptions::new(viewer()),
    )
    .await;
    let mut rx = view.subscribe_events();
    assert!(view.load_history().await);

    assert!(view.begin_edit(MessageId(5)).await);
    assert!(view.set_edit_draft("typo").await);
    assert_eq!(view.save_edit().await, EditOutcome::Failed);

    let session = view.edit_session().await.expect("dialog stays open");
    assert_eq!(session.draft(), "typo");
    assert!(!session.is_saving());
    assert_eq!(
        view.snapshot().await.message(MessageId(5)).map(|m| m.content.clone()),
        Some("tpyo".to_string())
    );
    let alert = next_matching(&mut rx, |event| matches!(event, ClientEvent::Alert { .. })).await;
    assert!(matches!(
        alert,
        ClientEvent::Alert {
            action: UserAction::EditMessage,
            ..
        }
    ));

    api.script.lock().await.fail_edits = false;
    assert_eq!(view.save_edit().await, EditOutcome::Saved);

    assert!(view.edit_session().await.is_none());
    let state = view.snapshot().await;
    assert_eq!(state.position_of(MessageId(5)), Some(1));
    assert_eq!(state.len(), 3);
    let edited = state.message(MessageId(5)).expect("edited message");
    assert_eq!(edited.content, "typo");
    assert!(edited.is_edited);
}

#[tokio::test]
async fn edited_broadcast_updates_in_place() {
    let transport = InProcessTransport::new(64);
    let history = vec![
        payload(1, "one", author(8, "Rook")),
        payload(2, "two", author(8, "Rook")),
        payload(3, "three", author(8, "Rook")),
    ];
    let view = mount_view(
        transport.clone(),
        ScriptedApi::new(history),
        ViewOptions::new(viewer()),
    )
    .await;
    view.load_history().await;

    let mut edited = payload(2, "two (fixed)", author(8, "Rook"));
    edited.is_edited = true;
    transport.publish(
        channel_topic(),
        TopicEvent::Message(MessageEvent::Edited(edited)),
    );

    wait_until(&view, |state| {
        state
            .message(MessageId(2))
            .is_some_and(|message| message.is_edited)
    })
    .await;
    let state = view.snapshot().await;
    assert_eq!(state.len(), 3);
    assert_eq!(state.position_of(MessageId(2)), Some(1));
    assert_eq!(
        state.message(MessageId(2)).map(|m| m.content.as_str()),
        Some("two (fixed)")
    );
}

#[tokio::test]
async fn deleted_message_stays_gone() {
    let transport = InProcessTransport::new(64);
    let history = vec![payload(1, "one", viewer()), payload(2, "two", viewer())];
    let view = mount_view(
        transport.clone(),
        ScriptedApi::new(history),
        ViewOptions::new(viewer()),
    )
    .await;
    view.load_history().await;
    view.toggle_menu(MenuId::message(MessageId(2))).await;

    assert!(view.delete_message(MessageId(2)).await);
    transport.publish(
        channel_topic(),
        TopicEvent::Message(MessageEvent::Deleted {
            message_id: MessageId(2),
        }),
    );
    transport.publish(channel_topic(), posted(payload(2, "two", viewer())));
    transport.publish(channel_topic(), posted(payload(9, "after", viewer())));

    wait_until(&view, |state| state.message(MessageId(9)).is_some()).await;
    let state = view.snapshot().await;
    assert!(state.message(MessageId(2)).is_none());
    assert!(state.was_deleted(MessageId(2)));
    assert!(state.active_menu().is_none());
    assert_eq!(state.len(), 2);
}

#[tokio::test]
async fn history_pages_prepend_older_messages() {
    let history: Vec<MessagePayload> = (1..=5)
        .map(|id| payload(id, &format!("message {id}"), author(8, "Rook")))
        .collect();
    let mut options = ViewOptions::new(viewer());
    options.history_limit = 2;
    let view = mount_view(InProcessTransport::new(64), ScriptedApi::new(history), options).await;

    assert!(view.load_history().await);
    assert!(view.load_history().await);

    let ids: Vec<Option<MessageId>> = view
        .snapshot()
        .await
        .entries()
        .iter()
        .map(ChatEntry::message_id)
        .collect();
    assert_eq!(
        ids,
        vec![
            Some(MessageId(2)),
            Some(MessageId(3)),
            Some(MessageId(4)),
            Some(MessageId(5))
        ]
    );
}

fn lobby_updated(user: &MessageAuthor, expires_in: Option<chrono::Duration>) -> TopicEvent {
    TopicEvent::Presence(PresenceEvent::LobbyUpdated(LobbyUpdate {
        user_id: user.id,
        lobby_link: Some(format!("steam://joinlobby/730/{}", user.id.0)),
        display_name: Some(user.display_name.clone()),
        expires_at: expires_in.map(|after| Utc::now() + after),
    }))
}

#[tokio::test]
async fn own_lobby_changes_do_not_toast() {
    let transport = InProcessTransport::new(64);
    let view = mount_view(
        transport.clone(),
        ScriptedApi::new(Vec::new()),
        ViewOptions::new(viewer()),
    )
    .await;
    let mut rx = view.subscribe_events();

    transport.publish(ChannelTopic::Server(SERVER), lobby_updated(&viewer(), None));
    transport.publish(
        ChannelTopic::Server(SERVER),
        lobby_updated(&author(8, "Rook"), None),
    );

    let toast = next_matching(&mut rx, |event| matches!(event, ClientEvent::Toast(_))).await;
    assert!(matches!(
        toast,
        ClientEvent::Toast(Toast { user_id, ref text, .. })
            if user_id == UserId(8) && text == "Rook opened a lobby"
    ));

    let board = view.lobby_board().await;
    assert!(board.badge(UserId(7)).is_some());
    assert!(board.badge(UserId(8)).is_some());
    while let Ok(event) = rx.try_recv() {
        assert!(!matches!(event, ClientEvent::Toast(_)), "extra toast: {event:?}");
    }
}

#[tokio::test]
async fn expired_lobby_badges_are_swept() {
    let transport = InProcessTransport::new(64);
    let mut options = ViewOptions::new(viewer());
    options.lobby_sweep_interval = Duration::from_millis(20);
    let view = mount_view(transport.clone(), ScriptedApi::new(Vec::new()), options).await;
    let mut rx = view.subscribe_events();

    transport.publish(
        ChannelTopic::Server(SERVER),
        lobby_updated(&author(8, "Rook"), Some(chrono::Duration::milliseconds(150))),
    );
    transport.publish(
        ChannelTopic::Server(SERVER),
        lobby_updated(&author(9, "Vex"), None),
    );

    next_matching(&mut rx, |event| matches!(event, ClientEvent::Toast(toast) if toast.user_id == UserId(9)))
        .await;
    assert_eq!(view.lobby_board().await.len(), 2);

    tokio::time::timeout(Duration::from_secs(1), async {
        while view.lobby_board().await.badge(UserId(8)).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("expired badge was not swept");
    assert!(view.lobby_board().await.badge(UserId(9)).is_some());
}

#[tokio::test]
async fn missing_transport_still_sends_over_http() {
    let api = ScriptedApi::new(Vec::new());
    let view = mount_view(
        Arc::new(MissingBroadcastTransport),
        api.clone(),
        ViewOptions::new(viewer()),
    )
    .await;

    assert!(!view.is_live());
    view.set_draft("anyone up for ranked?").await;
    assert_eq!(view.send_message().await, SendOutcome::Sent(MessageId(42)));
    assert_eq!(view.snapshot().await.len(), 1);
    assert_eq!(api.calls().await, vec!["post"]);
}

#[tokio::test]
async fn remounting_a_channel_reuses_its_subscription() {
    let transport = InProcessTransport::new(64);
    let subscriptions = SubscriptionManager::new(transport.clone());
    let api: Arc<dyn MessageApi> = ScriptedApi::new(Vec::new());

    let first = ChatView::mount(
        &subscriptions,
        Arc::clone(&api),
        SERVER,
        CHANNEL,
        ViewOptions::new(viewer()),
    )
    .await;
    let second = ChatView::mount(
        &subscriptions,
        Arc::clone(&api),
        SERVER,
        CHANNEL,
        ViewOptions::new(viewer()),
    )
    .await;
    assert!(first.subscription().same_subscription(second.subscription()));

    transport.publish(channel_topic(), posted(payload(5, "hello", author(8, "Rook"))));
    wait_until(&second, |state| state.message(MessageId(5)).is_some()).await;
    assert_eq!(second.snapshot().await.occurrences(MessageId(5)), 1);
    assert!(first.snapshot().await.is_empty());

    first.unmount();
    assert!(transport.is_subscribed(&channel_topic()));
    second.unmount();
    assert!(!transport.is_subscribed(&channel_topic()));
    assert!(!transport.is_subscribed(&ChannelTopic::Server(SERVER)));
}

#[test]
fn action_labels_name_the_failed_action() {
    assert_eq!(UserAction::SendMessage.label(), "send message");
    assert_eq!(UserAction::EditMessage.label(), "edit message");
    assert_eq!(UserAction::DeleteMessage.label(), "delete message");
}
