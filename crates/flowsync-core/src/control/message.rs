//! Messages exchanged with the run executor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Control bus message.
///
/// Serialized as `{"type": "<KIND>", ...}` with camelCase fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Ask the executor to start a run
    #[serde(rename_all = "camelCase")]
    CreateRunWindow { session_id: Uuid, run_id: Uuid },

    /// Poll for a progress frame
    #[serde(rename_all = "camelCase")]
    RequestScreenshot { run_id: Uuid },

    /// Unsolicited progress frame
    #[serde(rename_all = "camelCase")]
    ScreenshotResponse { run_id: Uuid, image: String },

    /// Executor window went away
    #[serde(rename_all = "camelCase")]
    RunWindowClosed { run_id: Uuid },

    /// Bring a run's window to the front
    #[serde(rename_all = "camelCase")]
    JumpToRunWindow { run_id: Uuid },
}

impl ControlMessage {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::CreateRunWindow { run_id, .. }
            | Self::RequestScreenshot { run_id }
            | Self::ScreenshotResponse { run_id, .. }
            | Self::RunWindowClosed { run_id }
            | Self::JumpToRunWindow { run_id } => *run_id,
        }
    }

    /// Whether this kind is sent by the executor.
    pub fn is_inbound(&self) -> bool {
        matches!(self, Self::ScreenshotResponse { .. } | Self::RunWindowClosed { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateRunWindow { .. } => "CREATE_RUN_WINDOW",
            Self::RequestScreenshot { .. } => "REQUEST_SCREENSHOT",
            Self::ScreenshotResponse { .. } => "SCREENSHOT_RESPONSE",
            Self::RunWindowClosed { .. } => "RUN_WINDOW_CLOSED",
            Self::JumpToRunWindow { .. } => "JUMP_TO_RUN_WINDOW",
        }
    }
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} run={}", self.kind(), self.run_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids() -> (Uuid, Uuid) {
        (
            Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap(),
            Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap(),
        )
    }

    #[test]
    fn test_create_run_window_wire_shape() {
        let (session_id, run_id) = ids();
        let message = ControlMessage::CreateRunWindow { session_id, run_id };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "CREATE_RUN_WINDOW",
                "sessionId": "11111111-1111-1111-1111-111111111111",
                "runId": "22222222-2222-2222-2222-222222222222"
            })
        );
    }

    #[test]
    fn test_outbound_wire_shapes() {
        let (_, run_id) = ids();
        assert_eq!(
            serde_json::to_value(ControlMessage::RequestScreenshot { run_id }).unwrap(),
            json!({"type": "REQUEST_SCREENSHOT", "runId": run_id})
        );
        assert_eq!(
            serde_json::to_value(ControlMessage::JumpToRunWindow { run_id }).unwrap(),
            json!({"type": "JUMP_TO_RUN_WINDOW", "runId": run_id})
        );
    }

    #[test]
    fn test_parse_inbound() {
        let (_, run_id) = ids();
        let frame: ControlMessage = serde_json::from_value(json!({
            "type": "SCREENSHOT_RESPONSE",
            "runId": run_id,
            "image": "data:image/png;base64,AAAA"
        }))
        .unwrap();
        assert!(frame.is_inbound());
        assert_eq!(frame.run_id(), run_id);

        let closed: ControlMessage =
            serde_json::from_str(r#"{"type":"RUN_WINDOW_CLOSED","runId":"22222222-2222-2222-2222-222222222222"}"#)
                .unwrap();
        assert_eq!(closed, ControlMessage::RunWindowClosed { run_id });
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = serde_json::from_str::<ControlMessage>(r#"{"type":"RESIZE","runId":"x"}"#);
        assert!(result.is_err());
    }
}
