//! Step records: the flat, order-annotated program representation.
//!
//! A session's program and a run's live step array are both plain
//! `Vec<StepRecord>`. Nesting is encoded by `nesting_level` and the
//! `child_count` of control steps; see [`crate::tree`] for reconstruction.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    /// Function call.
    Function,
    /// Conditional block.
    If,
    /// Loop block.
    For,
    /// End-of-program marker.
    Done,
    /// Prompt for user input.
    UserInput,
}

impl StepType {
    /// Whether this step owns a declared number of direct children.
    pub fn is_control(self) -> bool {
        matches!(self, Self::If | Self::For)
    }
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::If => "if",
            Self::For => "for",
            Self::Done => "done",
            Self::UserInput => "user_input",
        };
        write!(f, "{}", s)
    }
}

/// One instruction of a workflow program.
///
/// Type-specific attributes are optional so that a record deserializes the
/// same way regardless of which backend pipeline produced it. Missing fields
/// fall back to their defaults instead of failing the whole array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// 1-based position, unique and strictly increasing within one array.
    pub step_number: u32,

    /// Depth within nested control-flow blocks.
    #[serde(default)]
    pub nesting_level: u32,

    /// Step kind.
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Currently executing.
    #[serde(default)]
    pub active: bool,

    /// Skipped by the executor.
    #[serde(default)]
    pub disabled: bool,

    /// Function name (`function` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human readable description (`function` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Function inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Map<String, Value>>,

    /// Function outputs, or the user's answer for `user_input` steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, Value>>,

    /// Whether the function needs a browser window.
    #[serde(default)]
    pub browser_required: bool,

    /// Condition or loop description (`if` / `for` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_description: Option<String>,

    /// Number of direct children (`if` / `for` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub child_count: Option<u32>,

    /// Current loop item (`for` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_value: Option<Value>,

    /// Completed loop iterations (`for` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_progress: Option<u32>,

    /// Total loop iterations (`for` steps).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_total: Option<u32>,
}

impl StepRecord {
    /// Create a bare step with all optional attributes unset.
    pub fn new(step_number: u32, nesting_level: u32, step_type: StepType) -> Self {
        Self {
            step_number,
            nesting_level,
            step_type,
            active: false,
            disabled: false,
            name: None,
            description: None,
            input: None,
            output: None,
            browser_required: false,
            control_description: None,
            child_count: None,
            control_value: None,
            n_progress: None,
            n_total: None,
        }
    }

    /// Create a function step.
    pub fn function(step_number: u32, nesting_level: u32, name: &str) -> Self {
        let mut step = Self::new(step_number, nesting_level, StepType::Function);
        step.name = Some(name.to_string());
        step
    }

    /// Create a control step (`if` or `for`) with a declared child count.
    pub fn control(step_number: u32, nesting_level: u32, step_type: StepType, child_count: u32) -> Self {
        let mut step = Self::new(step_number, nesting_level, step_type);
        step.child_count = Some(child_count);
        step
    }

    /// Whether this is an `if` / `for` step.
    pub fn is_control(&self) -> bool {
        self.step_type.is_control()
    }

    /// Declared number of direct children; zero for non-control steps.
    pub fn declared_children(&self) -> u32 {
        if self.is_control() {
            self.child_count.unwrap_or(0)
        } else {
            0
        }
    }

    /// Loop progress as a fraction, when both counters are known.
    pub fn loop_progress(&self) -> Option<f64> {
        match (self.n_progress, self.n_total) {
            (Some(done), Some(total)) if total > 0 => Some(f64::from(done) / f64::from(total)),
            _ => None,
        }
    }
}
