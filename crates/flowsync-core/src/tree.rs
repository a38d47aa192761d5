//! Step tree reconstruction.
//!
//! Turns the flat, order-annotated step array into a forest of control-flow
//! nodes. A control step with `child_count = n` owns the next `n` steps at
//! `nesting_level + 1`; deeper steps in between are descendants of those
//! children.
//!
//! The reconstruction is total. Malformed counts produce fewer children than
//! declared instead of an error, and the scan never leaves the slice it was
//! given.

use serde::Serialize;

use crate::model::StepRecord;

/// A step together with its direct children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepNode {
    pub step: StepRecord,
    pub children: Vec<StepNode>,
}

/// Top-level nodes in program order.
pub type Forest = Vec<StepNode>;

impl StepNode {
    /// Number of nodes below this one.
    pub fn descendant_count(&self) -> usize {
        self.children
            .iter()
            .map(|c| 1 + c.descendant_count())
            .sum()
    }
}

/// Nest a flat step array into a forest.
///
/// The input is borrowed and never modified; the same input always yields
/// the same forest.
pub fn nest(steps: &[StepRecord]) -> Forest {
    nest_level(steps, 0)
}

fn nest_level(steps: &[StepRecord], level: u32) -> Forest {
    let mut nodes = Vec::new();
    let mut i = 0;

    while i < steps.len() {
        let step = &steps[i];
        if step.nesting_level != level {
            // Belongs to an ancestor's range or is malformed.
            i += 1;
            continue;
        }

        let declared = step.declared_children();
        if declared == 0 {
            nodes.push(StepNode {
                step: step.clone(),
                children: Vec::new(),
            });
            i += 1;
            continue;
        }

        let end = child_range_end(steps, i, level, declared);
        let children = nest_level(&steps[i + 1..end], level + 1);

        if (children.len() as u32) < declared {
            tracing::debug!(
                step_number = step.step_number,
                declared,
                found = children.len(),
                "Control step declares more children than present"
            );
        }

        nodes.push(StepNode {
            step: step.clone(),
            children,
        });
        i = end;
    }

    nodes
}

/// Exclusive end of the range holding the children of `steps[start]`.
///
/// Counts steps at `level + 1` until `declared` have been seen, then keeps
/// the deeper steps that follow (descendants of the last child). Stops early
/// at any step at `level` or shallower, since it cannot be a descendant.
fn child_range_end(steps: &[StepRecord], start: usize, level: u32, declared: u32) -> usize {
    let mut seen = 0;
    let mut end = start + 1;

    while end < steps.len() {
        let nesting = steps[end].nesting_level;
        if nesting <= level {
            break;
        }
        if nesting == level + 1 {
            if seen == declared {
                break;
            }
            seen += 1;
        }
        end += 1;
    }

    end
}

/// Flatten a forest back into program order (pre-order).
pub fn flatten(forest: &[StepNode]) -> Vec<StepRecord> {
    let mut out = Vec::new();
    flatten_into(forest, &mut out);
    out
}

fn flatten_into(forest: &[StepNode], out: &mut Vec<StepRecord>) {
    for node in forest {
        out.push(node.step.clone());
        flatten_into(&node.children, out);
    }
}
