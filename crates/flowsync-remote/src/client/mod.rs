//! HTTP clients.

mod read_model;

pub use read_model::{HttpReadModel, RunStatePatch};
