//! NATS adapters: change feed subscriber and executor control bus.

mod connect;
mod control;
mod feed;

pub use connect::{connect, NatsEndpoint};
pub use control::NatsControlBus;
pub use feed::{decode_change, feed_subject, NatsFeedSource};
