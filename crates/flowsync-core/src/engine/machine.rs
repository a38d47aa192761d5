//! Run lifecycle state machine.
//!
//! The machine is stateless: the current state always lives on the
//! [`ExecutionRun`](crate::model::ExecutionRun) entity and this module only
//! answers which transitions the user may request from it.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a run (`code_run_state` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Executing steps.
    #[default]
    Running,
    /// Suspended by the user.
    Paused,
    /// Stopped by the backend.
    Stopped,
    /// Cancelled by the user.
    Aborted,
    /// Completed normally.
    Finished,
    /// Blocked on a `user_input` step.
    WaitingForUser,
    /// The executor window went away.
    WindowClosed,
    /// The executor crashed.
    Crashed,
}

/// Every state, in declaration order.
pub const ALL_STATES: [RunState; 8] = [
    RunState::Running,
    RunState::Paused,
    RunState::Stopped,
    RunState::Aborted,
    RunState::Finished,
    RunState::WaitingForUser,
    RunState::WindowClosed,
    RunState::Crashed,
];

impl RunState {
    /// Terminal states have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Stopped | Self::Aborted | Self::Finished | Self::WindowClosed | Self::Crashed
        )
    }

    /// Targets the user may request from this state.
    pub fn allowed_controls(self) -> &'static [RunState] {
        match self {
            Self::Running => &[Self::Paused, Self::Aborted],
            Self::Paused => &[Self::Running, Self::Aborted],
            Self::WaitingForUser => &[Self::Running],
            _ => &[],
        }
    }

    /// Whether a user request `self -> to` is in the control table.
    pub fn can_request(self, to: RunState) -> bool {
        self.allowed_controls().contains(&to)
    }

    /// Whether a backend-reported `self -> to` contradicts the table.
    ///
    /// The backend is still authoritative; callers apply the new state and
    /// only log the anomaly.
    pub fn is_anomalous_backend_transition(self, to: RunState) -> bool {
        self.is_terminal() && self != to
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
            Self::Aborted => write!(f, "aborted"),
            Self::Finished => write!(f, "finished"),
            Self::WaitingForUser => write!(f, "waiting_for_user"),
            Self::WindowClosed => write!(f, "window_closed"),
            Self::Crashed => write!(f, "crashed"),
        }
    }
}

impl std::str::FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "stopped" => Ok(Self::Stopped),
            "aborted" => Ok(Self::Aborted),
            "finished" => Ok(Self::Finished),
            "waiting_for_user" => Ok(Self::WaitingForUser),
            "window_closed" => Ok(Self::WindowClosed),
            "crashed" => Ok(Self::Crashed),
            other => Err(format!("unknown run state: {}", other)),
        }
    }
}

/// User-invocable run controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    Abort,
}

impl ControlAction {
    /// State this control asks for.
    pub fn target(self) -> RunState {
        match self {
            Self::Pause => RunState::Paused,
            Self::Resume => RunState::Running,
            Self::Abort => RunState::Aborted,
        }
    }

    /// Controls to offer for a run in `state`.
    pub fn offered(state: RunState) -> Vec<ControlAction> {
        [Self::Pause, Self::Resume, Self::Abort]
            .into_iter()
            .filter(|action| state.can_request(action.target()))
            .collect()
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let allowed = [
            (RunState::Running, RunState::Paused),
            (RunState::Running, RunState::Aborted),
            (RunState::Paused, RunState::Running),
            (RunState::Paused, RunState::Aborted),
            (RunState::WaitingForUser, RunState::Running),
        ];

        for from in ALL_STATES {
            for to in ALL_STATES {
                assert_eq!(
                    from.can_request(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_controls() {
        for state in ALL_STATES.into_iter().filter(|s| s.is_terminal()) {
            assert!(state.allowed_controls().is_empty(), "{}", state);
            assert!(ControlAction::offered(state).is_empty());
        }
        assert!(!RunState::Running.is_terminal());
        assert!(!RunState::Paused.is_terminal());
        assert!(!RunState::WaitingForUser.is_terminal());
    }

    #[test]
    fn test_paused_abort_then_resume_rejected() {
        let state = RunState::Paused;
        assert!(state.can_request(RunState::Aborted));
        let state = RunState::Aborted;
        assert!(!state.can_request(RunState::Running));
    }

    #[test]
    fn test_offered_controls() {
        assert_eq!(
            ControlAction::offered(RunState::Running),
            vec![ControlAction::Pause, ControlAction::Abort]
        );
        assert_eq!(
            ControlAction::offered(RunState::Paused),
            vec![ControlAction::Resume, ControlAction::Abort]
        );
        assert_eq!(
            ControlAction::offered(RunState::WaitingForUser),
            vec![ControlAction::Resume]
        );
    }

    #[test]
    fn test_anomalous_backend_transition() {
        assert!(!RunState::Running.is_anomalous_backend_transition(RunState::Finished));
        assert!(!RunState::Paused.is_anomalous_backend_transition(RunState::Crashed));
        assert!(!RunState::Finished.is_anomalous_backend_transition(RunState::Finished));
        assert!(RunState::Finished.is_anomalous_backend_transition(RunState::Running));
    }

    #[test]
    fn test_wire_names() {
        for state in ALL_STATES {
            let json = serde_json::to_value(state).unwrap();
            assert_eq!(json, serde_json::Value::String(state.to_string()));
            assert_eq!(state.to_string().parse::<RunState>(), Ok(state));
        }
        assert!("exploded".parse::<RunState>().is_err());
    }
}
