//! One mounted chat view: the message list, composer, edit dialog and lobby
//! badges for a `(server, channel)` pair, kept in sync with broadcast events.
//!
//! Every mutation of the view model happens under a single async mutex, so
//! broadcast handlers and user actions are applied one at a time. The lock is
//! never held across a network request.

use std::{
    sync::{Arc, Weak},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{ChannelId, MessageId, ServerId},
    protocol::{BroadcastEnvelope, MessageAuthor, MessageEvent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    api::MessageApi,
    composer::{Composer, EditSession},
    dispatch::DispatchTable,
    error::ClientError,
    presence::LobbyBoard,
    store::{ChatAction, ChatState, MenuId, PendingMessage},
    subscription::{SubscriptionHandle, SubscriptionManager, TopicHandler},
    ClientEvent, UserAction,
};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ViewModel {
    pub viewer: MessageAuthor,
    pub chat: ChatState,
    pub lobbies: LobbyBoard,
    pub composer: Composer,
    pub edit: Option<EditSession>,
}

impl ViewModel {
    pub fn new(viewer: MessageAuthor) -> Self {
        Self {
            viewer,
            chat: ChatState::new(),
            lobbies: LobbyBoard::default(),
            composer: Composer::default(),
            edit: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ViewOptions {
    pub viewer: MessageAuthor,
    pub history_limit: u32,
    pub lobby_sweep_interval: Duration,
    pub event_buffer: usize,
}

impl ViewOptions {
    pub fn new(viewer: MessageAuthor) -> Self {
        Self {
            viewer,
            history_limit: 50,
            lobby_sweep_interval: Duration::from_secs(1),
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank draft or a send already in flight; nothing left the client.
    Rejected,
    Sent(MessageId),
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Rejected,
    Saved,
    Failed,
}

struct ViewCore {
    server_id: ServerId,
    channel_id: ChannelId,
    api: Arc<dyn MessageApi>,
    table: DispatchTable,
    history_limit: u32,
    model: Mutex<ViewModel>,
    events: broadcast::Sender<ClientEvent>,
}

impl ViewCore {
    fn emit(&self, notices: impl IntoIterator<Item = ClientEvent>) {
        for notice in notices {
            // No receivers is fine; the view state is still updated.
            let _ = self.events.send(notice);
        }
    }
}

#[async_trait]
impl TopicHandler for ViewCore {
    async fn handle_envelope(&self, envelope: BroadcastEnvelope) {
        let notices = {
            let mut model = self.model.lock().await;
            self.table.dispatch(&mut model, &envelope)
        };
        self.emit(notices);
    }
}

fn alert(action: UserAction, err: &ClientError) -> ClientEvent {
    ClientEvent::Alert {
        action,
        message: format!("Failed to {}: {err}", action.label()),
    }
}

pub struct ChatView {
    core: Arc<ViewCore>,
    subscription: SubscriptionHandle,
    sweeper: JoinHandle<()>,
}

impl ChatView {
    pub async fn mount(
        subscriptions: &SubscriptionManager,
        api: Arc<dyn MessageApi>,
        server_id: ServerId,
        channel_id: ChannelId,
        options: ViewOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        let core = Arc::new(ViewCore {
            server_id,
            channel_id,
            api,
            table: DispatchTable::standard(),
            history_limit: options.history_limit,
            model: Mutex::new(ViewModel::new(options.viewer)),
            events,
        });

        let handler: Arc<dyn TopicHandler> = core.clone();
        let subscription = subscriptions
            .subscribe(server_id, channel_id, handler)
            .await;
        if !subscription.is_live() {
            info!(
                server_id = server_id.0,
                channel_id = channel_id.0,
                "view: mounted without realtime updates"
            );
        }

        let period = options.lobby_sweep_interval.max(MIN_SWEEP_INTERVAL);
        let sweeper = tokio::spawn(sweep_lobbies(Arc::downgrade(&core), period));

        Self {
            core,
            subscription,
            sweeper,
        }
    }

    pub fn server_id(&self) -> ServerId {
        self.core.server_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.core.channel_id
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.core.events.subscribe()
    }

    pub fn is_live(&self) -> bool {
        self.subscription.is_live()
    }

    pub fn subscription(&self) -> &SubscriptionHandle {
        &self.subscription
    }

    pub async fn snapshot(&self) -> ChatState {
        self.core.model.lock().await.chat.clone()
    }

    pub async fn lobby_board(&self) -> LobbyBoard {
        self.core.model.lock().await.lobbies.clone()
    }

    pub async fn composer(&self) -> Composer {
        self.core.model.lock().await.composer.clone()
    }

    pub async fn edit_session(&self) -> Option<EditSession> {
        self.core.model.lock().await.edit.clone()
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> bool {
        self.core.model.lock().await.composer.set_draft(text)
    }

    /// Submits the composer draft. The message shows as pending until the
    /// server answers; the input stays disabled for that long.
    pub async fn send_message(&self) -> SendOutcome {
        let (nonce, content) = {
            let mut model = self.core.model.lock().await;
            let Some(content) = model.composer.begin_submit() else {
                debug!("view: send rejected, blank draft or send in flight");
                return SendOutcome::Rejected;
            };
            let pending = PendingMessage::new(content.clone(), model.viewer.clone());
            let nonce = pending.nonce;
            model.chat.apply(ChatAction::QueuePending(pending));
            (nonce, content)
        };
        self.core.emit([ClientEvent::MessagesChanged]);

        let result = self
            .core
            .api
            .post_message(self.core.server_id, self.core.channel_id, &content)
            .await;

        let mut model = self.core.model.lock().await;
        model.composer.finish_submit();
        let (outcome, mut notices) = match result {
            Ok(message) => {
                let message_id = message.id;
                let applied = model.chat.apply(ChatAction::ConfirmSend { nonce, message });
                debug!(message_id = message_id.0, ?applied, "reconcile: send confirmed");
                (SendOutcome::Sent(message_id), vec![ClientEvent::MessagesChanged])
            }
            Err(err) => {
                warn!(%nonce, %err, "view: send failed");
                model.chat.apply(ChatAction::DiscardPending { nonce });
                (
                    SendOutcome::Failed,
                    vec![
                        ClientEvent::MessagesChanged,
                        alert(UserAction::SendMessage, &err),
                    ],
                )
            }
        };
        drop(model);
        notices.push(ClientEvent::ComposerReady);
        self.core.emit(notices);
        outcome
    }

    /// Opens the edit dialog for a message in the list.
    pub async fn begin_edit(&self, message_id: MessageId) -> bool {
        let mut model = self.core.model.lock().await;
        if model.edit.as_ref().is_some_and(EditSession::is_saving) {
            return false;
        }
        let Some(content) = model.chat.message(message_id).map(|message| message.content.clone())
        else {
            return false;
        };
        model.edit = Some(EditSession::new(message_id, content));
        model.chat.close_menu();
        true
    }

    pub async fn set_edit_draft(&self, text: impl Into<String>) -> bool {
        let mut model = self.core.model.lock().await;
        match model.edit.as_mut() {
            Some(session) => session.set_draft(text),
            None => false,
        }
    }

    /// Saves the open edit. On failure the dialog stays open with its draft.
    pub async fn save_edit(&self) -> EditOutcome {
        let (message_id, content) = {
            let mut model = self.core.model.lock().await;
            let Some(session) = model.edit.as_mut() else {
                return EditOutcome::Rejected;
            };
            let Some(content) = session.begin_save() else {
                return EditOutcome::Rejected;
            };
            (session.message_id(), content)
        };

        let result = self
            .core
            .api
            .edit_message(self.core.server_id, self.core.channel_id, message_id, &content)
            .await;

        let mut model = self.core.model.lock().await;
        let (outcome, notices) = match result {
            Ok(message) => {
                if model.edit.as_ref().map(EditSession::message_id) == Some(message_id) {
                    model.edit = None;
                }
                let applied = model
                    .chat
                    .apply(ChatAction::Remote(MessageEvent::Edited(message)));
                debug!(message_id = message_id.0, ?applied, "reconcile: edit saved");
                let notices = if applied.changed() {
                    vec![ClientEvent::MessagesChanged]
                } else {
                    Vec::new()
                };
                (EditOutcome::Saved, notices)
            }
            Err(err) => {
                warn!(message_id = message_id.0, %err, "view: edit failed");
                if let Some(session) = model.edit.as_mut() {
                    session.finish_save();
                }
                (EditOutcome::Failed, vec![alert(UserAction::EditMessage, &err)])
            }
        };
        drop(model);
        self.core.emit(notices);
        outcome
    }

    pub async fn cancel_edit(&self) -> bool {
        self.core.model.lock().await.edit.take().is_some()
    }

    pub async fn delete_message(&self, message_id: MessageId) -> bool {
        let result = self
            .core
            .api
            .delete_message(self.core.server_id, self.core.channel_id, message_id)
            .await;

        match result {
            Ok(deleted) => {
                let applied = {
                    let mut model = self.core.model.lock().await;
                    model
                        .chat
                        .apply(ChatAction::Remote(MessageEvent::Deleted { message_id: deleted }))
                };
                debug!(message_id = deleted.0, ?applied, "reconcile: delete confirmed");
                if applied.changed() {
                    self.core.emit([ClientEvent::MessagesChanged]);
                }
                true
            }
            Err(err) => {
                warn!(message_id = message_id.0, %err, "view: delete failed");
                self.core.emit([alert(UserAction::DeleteMessage, &err)]);
                false
            }
        }
    }

    /// Loads the page of messages older than the oldest one shown.
    pub async fn load_history(&self) -> bool {
        let before = self.core.model.lock().await.chat.oldest_message_id();
        let result = self
            .core
            .api
            .list_messages(
                self.core.server_id,
                self.core.channel_id,
                self.core.history_limit,
                before,
            )
            .await;

        match result {
            Ok(page) => {
                let count = page.len();
                let applied = self
                    .core
                    .model
                    .lock()
                    .await
                    .chat
                    .apply(ChatAction::HistoryLoaded(page));
                debug!(count, ?applied, "view: history page loaded");
                if applied.changed() {
                    self.core.emit([ClientEvent::MessagesChanged]);
                }
                true
            }
            Err(err) => {
                warn!(%err, "view: history load failed");
                self.core.emit([alert(UserAction::LoadHistory, &err)]);
                false
            }
        }
    }

    pub async fn toggle_menu(&self, menu: MenuId) -> Option<MenuId> {
        self.core.model.lock().await.chat.toggle_menu(menu).cloned()
    }

    pub async fn close_menu(&self) {
        self.core.model.lock().await.chat.close_menu();
    }

    pub fn unmount(self) {
        info!(
            server_id = self.core.server_id.0,
            channel_id = self.core.channel_id.0,
            "view: unmounted"
        );
    }
}

impl Drop for ChatView {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}

async fn sweep_lobbies(core: Weak<ViewCore>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(core) = core.upgrade() else {
            break;
        };
        let expired = core.model.lock().await.lobbies.sweep_expired(Utc::now());
        if expired.is_empty() {
            continue;
        }
        debug!(count = expired.len(), "presence: lobby badges expired");
        core.emit(
            expired
                .into_iter()
                .map(|user_id| ClientEvent::LobbyBadgeChanged { user_id }),
        );
    }
}
