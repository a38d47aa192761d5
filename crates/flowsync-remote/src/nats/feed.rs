//! NATS change feed subscriber.
//!
//! Each topic maps to the subject `<prefix>.<topic subject>`. Payloads are
//! JSON change messages; malformed payloads are logged and skipped so one
//! bad row never stalls a feed.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use flowsync_core::channel::{FeedSource, Topic};
use flowsync_core::model::ChangeMessage;
use flowsync_core::FlowResult;

use super::connect::connect;
use crate::error::RemoteError;

/// Change feed source backed by core NATS subscriptions.
#[derive(Clone)]
pub struct NatsFeedSource {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsFeedSource {
    /// Create a feed source from an existing client.
    pub fn new(client: async_nats::Client, subject_prefix: &str) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.trim_end_matches('.').to_string(),
        }
    }

    /// Connect to NATS and create a feed source.
    pub async fn connect(nats_url: &str, subject_prefix: &str) -> FlowResult<Self> {
        let client = connect(nats_url)
            .await
            .map_err(|e| RemoteError::Connection(format!("{:#}", e)))?;
        Ok(Self::new(client, subject_prefix))
    }

    pub fn subject_for(&self, topic: &Topic) -> String {
        feed_subject(&self.subject_prefix, topic)
    }
}

/// Full NATS subject of a topic.
pub fn feed_subject(prefix: &str, topic: &Topic) -> String {
    format!("{}.{}", prefix, topic.subject())
}

/// Parse one feed payload, logging and dropping it if malformed.
pub fn decode_change(topic: &Topic, payload: &[u8]) -> Option<ChangeMessage> {
    match serde_json::from_slice::<ChangeMessage>(payload) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(topic = %topic, error = %e, bytes = payload.len(), "Dropping malformed change message");
            None
        }
    }
}

#[async_trait]
impl FeedSource for NatsFeedSource {
    async fn open(&self, topic: &Topic) -> FlowResult<BoxStream<'static, ChangeMessage>> {
        let subject = self.subject_for(topic);
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| RemoteError::Subscribe(e.to_string()))?;

        tracing::info!(subject = %subject, "Subscribed to change feed");

        let topic = *topic;
        let stream = subscriber.filter_map(move |msg| futures::future::ready(decode_change(&topic, &msg.payload)));
        Ok(stream.boxed())
    }
}
