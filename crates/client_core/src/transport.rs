//! Push transports delivering [`BroadcastEnvelope`]s for subscribed topics.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use shared::{
    domain::UserId,
    protocol::{BroadcastEnvelope, ChannelTopic, ClientFrame, TopicEvent},
};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

pub const DEFAULT_TRANSPORT_CAPACITY: usize = 256;

#[async_trait]
pub trait BroadcastTransport: Send + Sync {
    /// Starts delivery for `topic`. The receiver is shared between topics, so
    /// callers filter by [`BroadcastEnvelope::topic`].
    async fn subscribe(&self, topic: ChannelTopic) -> Result<broadcast::Receiver<BroadcastEnvelope>>;

    /// Releases one earlier `subscribe` for `topic`. Safe to call from `Drop`.
    fn unsubscribe(&self, topic: ChannelTopic);
}

pub struct MissingBroadcastTransport;

#[async_trait]
impl BroadcastTransport for MissingBroadcastTransport {
    async fn subscribe(&self, topic: ChannelTopic) -> Result<broadcast::Receiver<BroadcastEnvelope>> {
        Err(ClientError::TransportUnavailable(format!(
            "no broadcast transport configured for {topic}"
        )))
    }

    fn unsubscribe(&self, _topic: ChannelTopic) {}
}

/// Per-topic reference counts so overlapping views share one server-side subscription.
#[derive(Debug, Default)]
struct TopicRefs {
    counts: HashMap<ChannelTopic, usize>,
}

impl TopicRefs {
    /// Returns true when this is the first reference.
    fn acquire(&mut self, topic: ChannelTopic) -> bool {
        let count = self.counts.entry(topic).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Returns true when the last reference was released.
    fn release(&mut self, topic: ChannelTopic) -> bool {
        match self.counts.get_mut(&topic) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.remove(&topic);
                true
            }
            None => false,
        }
    }

    fn contains(&self, topic: &ChannelTopic) -> bool {
        self.counts.contains_key(topic)
    }
}

/// Transport backed by an in-process broadcast channel.
pub struct InProcessTransport {
    tx: broadcast::Sender<BroadcastEnvelope>,
    refs: Mutex<TopicRefs>,
}

impl InProcessTransport {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(capacity);
        Arc::new(Self {
            tx,
            refs: Mutex::new(TopicRefs::default()),
        })
    }

    /// Publishes `event` on `topic`; returns how many receivers saw it.
    pub fn publish(&self, topic: ChannelTopic, event: TopicEvent) -> usize {
        match event.into_envelope(topic) {
            Ok(envelope) => self.publish_envelope(envelope),
            Err(err) => {
                warn!(%topic, %err, "transport: failed to encode event");
                0
            }
        }
    }

    pub fn publish_envelope(&self, envelope: BroadcastEnvelope) -> usize {
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn is_subscribed(&self, topic: &ChannelTopic) -> bool {
        self.refs.lock().contains(topic)
    }
}

#[async_trait]
impl BroadcastTransport for InProcessTransport {
    async fn subscribe(&self, topic: ChannelTopic) -> Result<broadcast::Receiver<BroadcastEnvelope>> {
        self.refs.lock().acquire(topic);
        Ok(self.tx.subscribe())
    }

    fn unsubscribe(&self, topic: ChannelTopic) {
        self.refs.lock().release(topic);
    }
}

/// Emptied by the reader task when the socket ends, which closes every receiver.
type InboundSlot = Arc<Mutex<Option<broadcast::Sender<BroadcastEnvelope>>>>;

/// One websocket multiplexing every topic the client is subscribed to.
pub struct WebSocketTransport {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    inbound: InboundSlot,
    refs: Mutex<TopicRefs>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

pub fn websocket_url(server_url: &str, user_id: UserId) -> Result<String> {
    let ws_url = if server_url.starts_with("https://") {
        server_url.replacen("https://", "wss://", 1)
    } else if server_url.starts_with("http://") {
        server_url.replacen("http://", "ws://", 1)
    } else {
        return Err(ClientError::UnsupportedScheme(server_url.to_string()));
    };
    let ws_url = ws_url.trim_end_matches('/');
    Ok(format!("{ws_url}/ws?user_id={}", user_id.0))
}

impl WebSocketTransport {
    pub async fn connect(server_url: &str, user_id: UserId, capacity: usize) -> Result<Arc<Self>> {
        let ws_url = websocket_url(server_url, user_id)?;
        let (ws_stream, _) = connect_async(&ws_url).await.map_err(|err| {
            ClientError::TransportUnavailable(format!("failed to connect websocket {ws_url}: {err}"))
        })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientFrame>();
        let (inbound_tx, _) = broadcast::channel(capacity);
        let inbound: InboundSlot = Arc::new(Mutex::new(Some(inbound_tx)));

        let writer = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(%err, "transport: failed to encode client frame");
                        continue;
                    }
                };
                if ws_writer.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        });

        let inbound_slot = Arc::clone(&inbound);
        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<BroadcastEnvelope>(&text) {
                            Ok(envelope) => {
                                if let Some(tx) = inbound_slot.lock().as_ref() {
                                    let _ = tx.send(envelope);
                                }
                            }
                            Err(err) => warn!(%err, "transport: dropping undecodable frame"),
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "transport: websocket receive failed");
                        break;
                    }
                }
            }
            inbound_slot.lock().take();
            info!("transport: websocket closed");
        });

        info!(%ws_url, "transport: websocket connected");
        Ok(Arc::new(Self {
            outbound,
            inbound,
            refs: Mutex::new(TopicRefs::default()),
            reader,
            writer,
        }))
    }

    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished() && !self.outbound.is_closed()
    }
}

#[async_trait]
impl BroadcastTransport for WebSocketTransport {
    async fn subscribe(&self, topic: ChannelTopic) -> Result<broadcast::Receiver<BroadcastEnvelope>> {
        if !self.is_connected() {
            return Err(ClientError::TransportUnavailable(
                "websocket is closed".to_string(),
            ));
        }
        let first = self.refs.lock().acquire(topic);
        if first {
            if self.outbound.send(ClientFrame::Subscribe { topic }).is_err() {
                self.refs.lock().release(topic);
                return Err(ClientError::TransportUnavailable(
                    "websocket writer stopped".to_string(),
                ));
            }
            debug!(%topic, "transport: subscribe frame queued");
        }
        match self.inbound.lock().as_ref() {
            Some(tx) => Ok(tx.subscribe()),
            None => {
                self.refs.lock().release(topic);
                Err(ClientError::TransportUnavailable(
                    "websocket is closed".to_string(),
                ))
            }
        }
    }

    fn unsubscribe(&self, topic: ChannelTopic) {
        let last = self.refs.lock().release(topic);
        if last {
            let _ = self.outbound.send(ClientFrame::Unsubscribe { topic });
            debug!(%topic, "transport: unsubscribe frame queued");
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
