//! Topic fan-out for websocket connections.
//!
//! Every published event goes through one broadcast channel; each connection
//! keeps its own topic set and forwards only the envelopes it asked for.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::UserId,
    protocol::{BroadcastEnvelope, ChannelTopic, ClientFrame, TopicEvent},
};
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct Hub {
    tx: broadcast::Sender<BroadcastEnvelope>,
    watchers: Arc<Mutex<HashMap<ChannelTopic, usize>>>,
}

impl Hub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            watchers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns how many connections were handed the envelope.
    pub fn publish(&self, topic: ChannelTopic, event: TopicEvent) -> usize {
        let envelope = match event.into_envelope(topic) {
            Ok(envelope) => envelope,
            Err(err) => {
                error!(%topic, %err, "hub: failed to encode event");
                return 0;
            }
        };
        let event = envelope.event.clone();
        let receivers = self.tx.send(envelope).unwrap_or(0);
        debug!(%topic, %event, receivers, "hub: published");
        receivers
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEnvelope> {
        self.tx.subscribe()
    }

    /// Connections currently subscribed to `topic`.
    pub async fn watchers(&self, topic: &ChannelTopic) -> usize {
        self.watchers.lock().await.get(topic).copied().unwrap_or(0)
    }

    async fn watch(&self, topic: ChannelTopic) {
        *self.watchers.lock().await.entry(topic).or_insert(0) += 1;
    }

    async fn unwatch(&self, topic: ChannelTopic) {
        let mut watchers = self.watchers.lock().await;
        if let Some(count) = watchers.get_mut(&topic) {
            *count -= 1;
            if *count == 0 {
                watchers.remove(&topic);
            }
        }
    }
}

/// Applies a client frame to a connection's topic set. Returns the topic whose
/// membership changed, or `None` for duplicates and undecodable frames.
pub fn apply_client_frame(
    topics: &mut HashSet<ChannelTopic>,
    text: &str,
) -> Option<(ChannelTopic, bool)> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscribe { topic }) => topics.insert(topic).then_some((topic, true)),
        Ok(ClientFrame::Unsubscribe { topic }) => topics.remove(&topic).then_some((topic, false)),
        Err(err) => {
            warn!(%err, "hub: ignoring malformed client frame");
            None
        }
    }
}

pub async fn serve_connection(hub: Hub, socket: WebSocket, user_id: UserId) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(hub.subscribe());
    let mut topics = HashSet::new();
    info!(user_id = user_id.0, "hub: connection opened");

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some((topic, subscribed)) = apply_client_frame(&mut topics, &text) {
                        if subscribed {
                            hub.watch(topic).await;
                        } else {
                            hub.unwatch(topic).await;
                        }
                        debug!(user_id = user_id.0, %topic, subscribed, "hub: topic membership changed");
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(user_id = user_id.0, %err, "hub: websocket receive failed");
                    break;
                }
            },
            event = events.next() => match event {
                Some(Ok(envelope)) => {
                    if !topics.contains(&envelope.topic) {
                        continue;
                    }
                    let text = match serde_json::to_string(&envelope) {
                        Ok(text) => text,
                        Err(err) => {
                            error!(%err, "hub: failed to encode envelope");
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(user_id = user_id.0, skipped, "hub: connection lagged, events dropped");
                }
                None => break,
            },
        }
    }

    for topic in topics {
        hub.unwatch(topic).await;
    }
    info!(user_id = user_id.0, "hub: connection closed");
}
