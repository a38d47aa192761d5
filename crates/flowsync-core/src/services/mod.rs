//! Service layer for flowsync.
//!
//! The sync service coordinates the store, live feeds and run control on
//! behalf of the host UI.

pub mod notifications;
pub mod sync;

pub use notifications::{Notification, NotificationKind, Notifications};
pub use sync::{SyncDeps, SyncService, Watch};
