//! Shared live feed subscriptions.
//!
//! A [`FeedSource`] opens the underlying feed for a [`Topic`]. The
//! [`ChannelManager`] keeps at most one open feed per topic, hands every
//! message once to a [`FeedSink`], then fans it out to all attached handles.

mod manager;
mod topic;

pub use manager::{ChannelHandle, ChannelManager};
pub use topic::Topic;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::FlowResult;
use crate::model::ChangeMessage;

/// Opens live change feeds.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Open the feed for `topic`. Dropping the stream closes it.
    async fn open(&self, topic: &Topic) -> FlowResult<BoxStream<'static, ChangeMessage>>;
}

/// Receives each feed message exactly once per topic, before fan-out.
#[async_trait]
pub trait FeedSink: Send + Sync {
    async fn deliver(&self, topic: &Topic, message: &ChangeMessage);
}
