use serde::{Deserialize, Serialize};

/// When a requested session end takes effect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndTrigger {
    Immediate,
    /// Wait until the farewell output has been delivered to the user
    #[default]
    AfterFarewell,
}

/// A requested session state transition, returned by a tool inside its response.
///
/// Only the state controller applies intents; handlers never touch session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    EndSession {
        #[serde(default)]
        trigger: EndTrigger,
    },
    CancelPendingEnd,
    SuppressAudio {
        suppressed: bool,
    },
    SuppressTranscript {
        suppressed: bool,
    },
    RecordTimeout {
        tool_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Any tag this build does not know. Logged and ignored on apply.
    #[serde(other)]
    Unknown,
}

impl Intent {
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::EndSession { .. } => "end_session",
            Intent::CancelPendingEnd => "cancel_pending_end",
            Intent::SuppressAudio { .. } => "suppress_audio",
            Intent::SuppressTranscript { .. } => "suppress_transcript",
            Intent::RecordTimeout { .. } => "record_timeout",
            Intent::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_session_defaults_to_after_farewell() {
        let intent: Intent = serde_json::from_str(r#"{"type": "end_session"}"#).unwrap();
        assert_eq!(
            intent,
            Intent::EndSession {
                trigger: EndTrigger::AfterFarewell
            }
        );
    }

    #[test]
    fn unknown_tag_deserializes_to_unknown() {
        let intent: Intent =
            serde_json::from_str(r#"{"type": "open_pod_bay_doors"}"#).unwrap();
        assert_eq!(intent, Intent::Unknown);
        assert_eq!(intent.kind(), "unknown");
    }

    #[test]
    fn tagged_shape() {
        let json = serde_json::to_value(Intent::SuppressAudio { suppressed: true }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "suppress_audio", "suppressed": true}));
    }
}
