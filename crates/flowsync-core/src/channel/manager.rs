//! Reference-counted channel registry.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{FeedSink, FeedSource, Topic};
use crate::error::FlowResult;
use crate::model::ChangeMessage;

/// An open feed shared by every handle attached to its topic.
struct Channel {
    refs: usize,
    sender: broadcast::Sender<ChangeMessage>,
    pump: JoinHandle<()>,
}

/// A consumer's claim on a topic. Give it back with [`ChannelManager::detach`].
pub struct ChannelHandle {
    id: Uuid,
    topic: Topic,
    receiver: broadcast::Receiver<ChangeMessage>,
}

impl ChannelHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next fanned-out message, or `None` once the feed is gone.
    ///
    /// Messages dropped because this handle fell behind are skipped; the
    /// store has already applied them.
    pub async fn recv(&mut self) -> Option<ChangeMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, handle = %self.id, skipped, "Channel handle lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Shares one live subscription per topic across all consumers.
#[derive(Clone)]
pub struct ChannelManager {
    source: Arc<dyn FeedSource>,
    channels: Arc<Mutex<HashMap<Topic, Channel>>>,
    buffer: usize,
}

impl ChannelManager {
    pub fn new(source: Arc<dyn FeedSource>, buffer: usize) -> Self {
        Self {
            source,
            channels: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// Attach to `topic`, opening its feed on the first attach.
    ///
    /// `sink` is only used when this call opens the feed.
    pub async fn attach(&self, topic: Topic, sink: Arc<dyn FeedSink>) -> FlowResult<ChannelHandle> {
        let mut channels = self.channels.lock().await;

        let receiver = match channels.get_mut(&topic) {
            Some(channel) => {
                channel.refs += 1;
                tracing::debug!(topic = %topic, refs = channel.refs, "Attached to open channel");
                channel.sender.subscribe()
            }
            None => {
                let stream = self.source.open(&topic).await?;
                let (sender, receiver) = broadcast::channel(self.buffer);
                let pump = tokio::spawn(pump(topic, stream, sink, sender.clone()));
                channels.insert(
                    topic,
                    Channel {
                        refs: 1,
                        sender,
                        pump,
                    },
                );
                tracing::info!(topic = %topic, "Channel opened");
                receiver
            }
        };

        Ok(ChannelHandle {
            id: Uuid::new_v4(),
            topic,
            receiver,
        })
    }

    /// Release a handle. The last detach for a topic closes its feed before
    /// returning.
    pub async fn detach(&self, handle: ChannelHandle) {
        let topic = handle.topic;
        drop(handle.receiver);

        let closed = {
            let mut channels = self.channels.lock().await;
            let Some(channel) = channels.get_mut(&topic) else {
                tracing::warn!(topic = %topic, handle = %handle.id, "Detach for unknown channel");
                return;
            };
            channel.refs = channel.refs.saturating_sub(1);
            if channel.refs > 0 {
                tracing::debug!(topic = %topic, refs = channel.refs, "Detached from channel");
                None
            } else {
                channels.remove(&topic)
            }
        };

        if let Some(channel) = closed {
            channel.pump.abort();
            let _ = channel.pump.await;
            tracing::info!(topic = %topic, "Channel closed");
        }
    }

    pub async fn is_open(&self, topic: &Topic) -> bool {
        self.channels.lock().await.contains_key(topic)
    }

    /// Active handles on `topic`.
    pub async fn subscriber_count(&self, topic: &Topic) -> usize {
        self.channels
            .lock()
            .await
            .get(topic)
            .map(|c| c.refs)
            .unwrap_or(0)
    }

    pub async fn open_topics(&self) -> Vec<Topic> {
        self.channels.lock().await.keys().copied().collect()
    }
}

async fn pump(
    topic: Topic,
    mut stream: BoxStream<'static, ChangeMessage>,
    sink: Arc<dyn FeedSink>,
    sender: broadcast::Sender<ChangeMessage>,
) {
    while let Some(message) = stream.next().await {
        tracing::trace!(topic = %topic, kind = %message.kind(), "Feed message");
        sink.deliver(&topic, &message).await;
        // No receivers is fine: the sink has already consumed it.
        let _ = sender.send(message);
    }
    tracing::warn!(topic = %topic, "Feed ended");
}
