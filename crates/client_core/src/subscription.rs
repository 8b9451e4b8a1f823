//! Topic subscriptions for open chat views.
//!
//! A `(server, channel)` pair maps to two topics: the channel topic carrying
//! message events and the server topic carrying lobby presence. Subscribing a
//! pair that is still live hands back the existing handle, pointed at the new
//! handler, so re-mounting a view never stacks listeners. A pair whose
//! listeners have stopped is opened afresh. Dropping the last handle stops the
//! listeners and releases both topics.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use shared::{
    domain::{ChannelId, ServerId},
    protocol::{BroadcastEnvelope, ChannelTopic},
};
use tokio::{
    sync::{broadcast::error::RecvError, broadcast::Receiver, Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::transport::BroadcastTransport;

#[async_trait]
pub trait TopicHandler: Send + Sync {
    async fn handle_envelope(&self, envelope: BroadcastEnvelope);
}

type HandlerCell = Arc<RwLock<Weak<dyn TopicHandler>>>;

struct SubscriptionInner {
    server_id: ServerId,
    channel_id: ChannelId,
    transport: Arc<dyn BroadcastTransport>,
    handler: HandlerCell,
    topics: Vec<ChannelTopic>,
    listeners: Vec<JoinHandle<()>>,
}

impl SubscriptionInner {
    fn is_live(&self) -> bool {
        !self.listeners.is_empty() && self.listeners.iter().all(|listener| !listener.is_finished())
    }
}

impl Drop for SubscriptionInner {
    fn drop(&mut self) {
        for listener in &self.listeners {
            listener.abort();
        }
        for topic in &self.topics {
            self.transport.unsubscribe(*topic);
        }
        debug!(
            server_id = self.server_id.0,
            channel_id = self.channel_id.0,
            "subscription: released"
        );
    }
}

#[derive(Clone)]
pub struct SubscriptionHandle {
    inner: Arc<SubscriptionInner>,
}

impl SubscriptionHandle {
    /// False when the transport was unavailable or has closed.
    pub fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    pub fn topics(&self) -> &[ChannelTopic] {
        &self.inner.topics
    }

    pub fn same_subscription(&self, other: &SubscriptionHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

pub struct SubscriptionManager {
    transport: Arc<dyn BroadcastTransport>,
    active: Mutex<HashMap<(ServerId, ChannelId), Weak<SubscriptionInner>>>,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn BroadcastTransport>) -> Self {
        Self {
            transport,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn subscribe(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        handler: Arc<dyn TopicHandler>,
    ) -> SubscriptionHandle {
        let key = (server_id, channel_id);
        let mut active = self.active.lock().await;
        active.retain(|_, inner| inner.strong_count() > 0);

        let existing = active
            .get(&key)
            .and_then(Weak::upgrade)
            .filter(|inner| inner.is_live());
        if let Some(existing) = existing {
            *existing.handler.write().await = Arc::downgrade(&handler);
            debug!(
                server_id = server_id.0,
                channel_id = channel_id.0,
                "subscription: reusing live subscription"
            );
            return SubscriptionHandle { inner: existing };
        }

        let inner = Arc::new(self.open(server_id, channel_id, handler).await);
        if !inner.listeners.is_empty() {
            active.insert(key, Arc::downgrade(&inner));
        }
        SubscriptionHandle { inner }
    }

    pub async fn live_pairs(&self) -> Vec<(ServerId, ChannelId)> {
        let active = self.active.lock().await;
        active
            .iter()
            .filter(|(_, inner)| inner.strong_count() > 0)
            .map(|(key, _)| *key)
            .collect()
    }

    async fn open(
        &self,
        server_id: ServerId,
        channel_id: ChannelId,
        handler: Arc<dyn TopicHandler>,
    ) -> SubscriptionInner {
        let handler: HandlerCell = Arc::new(RwLock::new(Arc::downgrade(&handler)));
        let wanted = [
            ChannelTopic::Channel(server_id, channel_id),
            ChannelTopic::Server(server_id),
        ];
        let mut topics = Vec::with_capacity(wanted.len());
        let mut listeners = Vec::with_capacity(wanted.len());

        for topic in wanted {
            match self.transport.subscribe(topic).await {
                Ok(receiver) => {
                    topics.push(topic);
                    listeners.push(tokio::spawn(listen(topic, receiver, Arc::clone(&handler))));
                }
                Err(err) => {
                    warn!(
                        %topic,
                        %err,
                        "subscription: transport unavailable, continuing without realtime updates"
                    );
                    for listener in listeners.drain(..) {
                        listener.abort();
                    }
                    for topic in topics.drain(..) {
                        self.transport.unsubscribe(topic);
                    }
                    break;
                }
            }
        }

        if !listeners.is_empty() {
            info!(
                server_id = server_id.0,
                channel_id = channel_id.0,
                "subscription: listening"
            );
        }
        SubscriptionInner {
            server_id,
            channel_id,
            transport: Arc::clone(&self.transport),
            handler,
            topics,
            listeners,
        }
    }
}

async fn listen(
    topic: ChannelTopic,
    mut receiver: Receiver<BroadcastEnvelope>,
    handler: HandlerCell,
) {
    loop {
        match receiver.recv().await {
            Ok(envelope) => {
                if envelope.topic != topic {
                    continue;
                }
                let target = handler.read().await.upgrade();
                // The cell may be rebound by a later mount.
                let Some(target) = target else {
                    debug!(%topic, "subscription: no handler bound, envelope skipped");
                    continue;
                };
                target.handle_envelope(envelope).await;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(%topic, skipped, "subscription: listener lagged, events dropped");
            }
            Err(RecvError::Closed) => {
                info!(%topic, "subscription: transport closed");
                break;
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/subscription_tests.rs"]
mod tests;
