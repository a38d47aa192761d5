//! flowsync remote adapters
//!
//! Network implementations of the flowsync-core collaborator traits:
//!
//! - [`nats::NatsFeedSource`]: change feed over core NATS subjects
//! - [`nats::NatsControlBus`]: control messages to and from the run executor
//! - [`client::HttpReadModel`]: session/run read model and run writer over HTTP

pub mod client;
pub mod error;
pub mod nats;

use std::sync::Arc;

use flowsync_core::config::FlowConfig;
use flowsync_core::services::{SyncDeps, SyncService};
use flowsync_core::FlowResult;

pub use error::RemoteError;

/// Connected adapters for one process.
pub struct Remote {
    pub deps: SyncDeps,
    pub control: nats::NatsControlBus,
}

impl Remote {
    /// Connect to NATS once and build every adapter from `config`.
    pub async fn connect(config: &FlowConfig) -> FlowResult<Self> {
        let client = nats::connect(&config.nats_url)
            .await
            .map_err(|e| RemoteError::Connection(format!("{:#}", e)))?;

        let feed = nats::NatsFeedSource::new(client.clone(), &config.feed_subject_prefix);
        let control = nats::NatsControlBus::new(client, &config.control_subject);
        let read_model = Arc::new(client::HttpReadModel::from_config(config)?);

        let deps = SyncDeps {
            feed: Arc::new(feed),
            read_model: read_model.clone(),
            writer: read_model,
            transport: Arc::new(control.clone()),
        };
        Ok(Self { deps, control })
    }

    /// Build the sync service and start forwarding executor messages to it.
    pub async fn start(self, config: FlowConfig) -> FlowResult<SyncService> {
        let sync = SyncService::new(config, self.deps);
        self.control.listen(sync.clone()).await?;
        Ok(sync)
    }
}
