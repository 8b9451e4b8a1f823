//! Event-kind to handler table for broadcast frames.
//!
//! Handlers are plain functions over [`ViewModel`], so the reconciliation
//! rules can be exercised without a live transport.

use std::collections::HashMap;

use shared::protocol::{events, BroadcastEnvelope, MessageEvent, PresenceEvent, TopicEvent};
use tracing::{debug, warn};

use crate::{error::Result, store::ChatAction, view::ViewModel, ClientEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessagePosted,
    MessageEdited,
    MessageDeleted,
    LobbyUpdated,
    LobbyCleared,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::MessagePosted,
        EventKind::MessageEdited,
        EventKind::MessageDeleted,
        EventKind::LobbyUpdated,
        EventKind::LobbyCleared,
    ];

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::MessagePosted => events::MESSAGE_POSTED,
            Self::MessageEdited => events::MESSAGE_EDITED,
            Self::MessageDeleted => events::MESSAGE_DELETED,
            Self::LobbyUpdated => events::LOBBY_UPDATED,
            Self::LobbyCleared => events::LOBBY_CLEARED,
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.wire_name() == name)
    }

    pub fn of(event: &TopicEvent) -> Self {
        match event {
            TopicEvent::Message(MessageEvent::Posted(_)) => Self::MessagePosted,
            TopicEvent::Message(MessageEvent::Edited(_)) => Self::MessageEdited,
            TopicEvent::Message(MessageEvent::Deleted { .. }) => Self::MessageDeleted,
            TopicEvent::Presence(PresenceEvent::LobbyUpdated(_)) => Self::LobbyUpdated,
            TopicEvent::Presence(PresenceEvent::LobbyCleared(_)) => Self::LobbyCleared,
        }
    }
}

pub type Handler = fn(&mut ViewModel, TopicEvent) -> Vec<ClientEvent>;

pub struct DispatchTable {
    handlers: HashMap<EventKind, Handler>,
}

impl DispatchTable {
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Message handlers for the channel topic, lobby handlers for the server topic.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(EventKind::MessagePosted, on_message_event);
        table.register(EventKind::MessageEdited, on_message_event);
        table.register(EventKind::MessageDeleted, on_message_event);
        table.register(EventKind::LobbyUpdated, on_presence_event);
        table.register(EventKind::LobbyCleared, on_presence_event);
        table
    }

    pub fn register(&mut self, kind: EventKind, handler: Handler) -> Option<Handler> {
        self.handlers.insert(kind, handler)
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn decode(envelope: &BroadcastEnvelope) -> Result<(EventKind, TopicEvent)> {
        let event = TopicEvent::from_envelope(envelope)?;
        Ok((EventKind::of(&event), event))
    }

    pub fn dispatch(&self, model: &mut ViewModel, envelope: &BroadcastEnvelope) -> Vec<ClientEvent> {
        let (kind, event) = match Self::decode(envelope) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(topic = %envelope.topic, %err, "dispatch: dropping broadcast frame");
                return Vec::new();
            }
        };
        let Some(handler) = self.handlers.get(&kind) else {
            debug!(event = kind.wire_name(), "dispatch: no handler registered");
            return Vec::new();
        };
        handler(model, event)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

fn on_message_event(model: &mut ViewModel, event: TopicEvent) -> Vec<ClientEvent> {
    let TopicEvent::Message(event) = event else {
        return Vec::new();
    };
    let message_id = event.message_id();
    let applied = model.chat.apply(ChatAction::Remote(event));
    debug!(message_id = message_id.0, ?applied, "reconcile: broadcast applied");
    if applied.changed() {
        vec![ClientEvent::MessagesChanged]
    } else {
        Vec::new()
    }
}

fn on_presence_event(model: &mut ViewModel, event: TopicEvent) -> Vec<ClientEvent> {
    let TopicEvent::Presence(event) = event else {
        return Vec::new();
    };
    let user_id = event.user_id();
    let outcome = model.lobbies.apply(event, model.viewer.id);
    let mut notices = Vec::new();
    if outcome.badge_changed {
        notices.push(ClientEvent::LobbyBadgeChanged { user_id });
    }
    if let Some(toast) = outcome.toast {
        notices.push(ClientEvent::Toast(toast));
    }
    notices
}
