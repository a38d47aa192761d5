//! Configuration module for flowsync.
//!
//! Configuration is read from environment variables with the `envy` crate,
//! optionally seeded from a `.env` file.

mod app;

pub use app::FlowConfig;
