//! Turn-level updates.
//!
//! `TurnUpdate` reports every change the session applies to the assistant
//! message, so a front end can render incrementally or forward the changes
//! as JSON lines.

use ragstream_core::message::{MessageStatus, SourceRef};
use serde::{Deserialize, Serialize};

/// A change applied to the in-flight assistant message.
///
/// - `delta`: text appended to the answer
/// - `sources`: the source list was replaced
/// - `completion_id`: the server id of the answer became known
/// - `finished`: the message reached a terminal status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnUpdate {
    Delta { content: String },

    Sources { sources: Vec<SourceRef> },

    CompletionId { id: String },

    Finished {
        status: MessageStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl TurnUpdate {
    /// Event name for this update.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Delta { .. } => "delta",
            Self::Sources { .. } => "sources",
            Self::CompletionId { .. } => "completion_id",
            Self::Finished { .. } => "finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_serialization() {
        let update = TurnUpdate::Delta {
            content: "Hello".into(),
        };
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains(r#""type":"delta""#));
        assert!(json.contains(r#""content":"Hello""#));
    }

    #[test]
    fn finished_serialization_skips_missing_error() {
        let update = TurnUpdate::Finished {
            status: MessageStatus::Aborted,
            error: None,
        };
        let json = serde_json::to_string(&update).unwrap();
        assert_eq!(json, r#"{"type":"finished","status":"aborted"}"#);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(TurnUpdate::Delta { content: "x".into() }.event_type(), "delta");
        assert_eq!(TurnUpdate::Sources { sources: vec![] }.event_type(), "sources");
        assert_eq!(TurnUpdate::CompletionId { id: "c".into() }.event_type(), "completion_id");
        assert_eq!(
            TurnUpdate::Finished {
                status: MessageStatus::Done,
                error: None
            }
            .event_type(),
            "finished"
        );
    }

    #[test]
    fn update_deserialization() {
        let json = r#"{"type":"completion_id","id":"chatcmpl_1"}"#;
        let update: TurnUpdate = serde_json::from_str(json).unwrap();
        assert_eq!(update, TurnUpdate::CompletionId { id: "chatcmpl_1".into() });
    }
}
