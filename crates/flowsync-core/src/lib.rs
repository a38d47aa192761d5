//! flowsync core library
//!
//! Keeps a live, normalized model of workflow execution sessions and runs
//! in sync with a remote change feed:
//!
//! - **Step trees**: nest flat, order-annotated step arrays into control-flow forests
//! - **Run lifecycle**: the state machine behind pause, resume and abort
//! - **Entity store**: sessions, runs and run events linked parent to child
//! - **Channels**: one shared live subscription per feed topic
//! - **Highlights**: transient emphasis for steps the executor just changed
//!
//! ## Architecture
//!
//! The store is updated only by discrete events: a snapshot load, a feed
//! message or a user action. [`services::SyncService`] serializes them.
//! Network access is behind the [`channel::FeedSource`],
//! [`store::ReadModel`], [`control::RunWriter`] and
//! [`control::ControlTransport`] traits; `flowsync-remote` provides NATS and
//! HTTP implementations.
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading from environment variables
//! - [`error`]: Library error type
//! - [`model`]: Sessions, runs, steps and feed messages
//! - [`tree`]: Step tree reconstruction
//! - [`engine`]: Run state machine
//! - [`store`]: Normalized entity store
//! - [`services`]: Sync service and notifications
//!
//! ## Example
//!
//! ```ignore
//! use flowsync_core::{config::FlowConfig, services::{SyncDeps, SyncService}, store::SnapshotFilter};
//!
//! async fn run(deps: SyncDeps) -> flowsync_core::FlowResult<()> {
//!     let config = FlowConfig::load()?;
//!     let sync = SyncService::new(config, deps);
//!     let mut watch = sync.watch(SnapshotFilter::Sessions).await?;
//!     while let Some(change) = watch.changed().await {
//!         // re-render from sync.read(...)
//!     }
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod control;
pub mod engine;
pub mod error;
pub mod highlight;
pub mod model;
pub mod result_ext;
pub mod services;
pub mod store;
pub mod telemetry;
pub mod tree;

pub use error::{FlowError, FlowResult};
pub use result_ext::ResultExt;
