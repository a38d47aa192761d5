//! Run lifecycle engine.
//!
//! - **Machine**: run states and the user-invocable transition table

pub mod machine;

pub use machine::{ControlAction, RunState, ALL_STATES};
