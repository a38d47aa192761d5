//! NATS control bus to the run executor.
//!
//! Outbound messages are published on `<prefix>.outbound`; the executor
//! replies on `<prefix>.inbound`.

use async_trait::async_trait;
use futures::StreamExt;
use tokio::task::JoinHandle;

use flowsync_core::control::{ControlMessage, ControlTransport};
use flowsync_core::services::SyncService;
use flowsync_core::FlowResult;

use super::connect::connect;
use crate::error::RemoteError;

#[derive(Clone)]
pub struct NatsControlBus {
    client: async_nats::Client,
    subject_prefix: String,
}

impl NatsControlBus {
    pub fn new(client: async_nats::Client, subject_prefix: &str) -> Self {
        Self {
            client,
            subject_prefix: subject_prefix.trim_end_matches('.').to_string(),
        }
    }

    pub async fn connect(nats_url: &str, subject_prefix: &str) -> FlowResult<Self> {
        let client = connect(nats_url)
            .await
            .map_err(|e| RemoteError::Connection(format!("{:#}", e)))?;
        Ok(Self::new(client, subject_prefix))
    }

    pub fn outbound_subject(&self) -> String {
        format!("{}.outbound", self.subject_prefix)
    }

    pub fn inbound_subject(&self) -> String {
        format!("{}.inbound", self.subject_prefix)
    }

    /// Forward executor messages to `sync` until the subscription ends.
    pub async fn listen(&self, sync: SyncService) -> FlowResult<JoinHandle<()>> {
        let subject = self.inbound_subject();
        let mut subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| RemoteError::Subscribe(e.to_string()))?;

        tracing::info!(subject = %subject, "Listening for executor messages");

        Ok(tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<ControlMessage>(&msg.payload) {
                    Ok(message) => {
                        tracing::debug!(kind = message.kind(), run_id = %message.run_id(), "Received control message");
                        sync.handle_inbound(message).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to parse control message");
                    }
                }
            }
            tracing::warn!(subject = %subject, "Control subscription ended");
        }))
    }
}

#[async_trait]
impl ControlTransport for NatsControlBus {
    async fn send(&self, message: &ControlMessage) -> FlowResult<()> {
        let payload = serde_json::to_vec(message)?;
        self.client
            .publish(self.outbound_subject(), payload.into())
            .await
            .map_err(|e| RemoteError::Publish(e.to_string()))?;

        tracing::debug!(kind = message.kind(), run_id = %message.run_id(), "Published control message");
        Ok(())
    }
}
