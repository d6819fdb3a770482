//! The ToolResponse envelope: the single contract every tool execution returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::intent::Intent;

/// Error taxonomy shared by the registry, the orchestrator gates and handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Bad arguments
    Validation,
    /// Unknown tool
    NotFound,
    ModeRestricted,
    BudgetExceeded,
    /// Carries a confirmation token in `details.confirmation_request`
    ConfirmationRequired,
    /// Same call repeated within one turn
    LoopDetected,
    SessionInactive,
    /// Network or timeout
    Transient,
    Permanent,
    RateLimit,
    Auth,
    Conflict,
    /// Unexpected failure, normalized by the registry
    Internal,
}

impl ErrorType {
    pub fn retryable_by_default(self) -> bool {
        matches!(self, ErrorType::Transient | ErrorType::RateLimit)
    }

    /// Errors raised by orchestrator gates before any handler runs.
    pub fn is_pre_execution(self) -> bool {
        matches!(
            self,
            ErrorType::Validation
                | ErrorType::NotFound
                | ErrorType::ModeRestricted
                | ErrorType::BudgetExceeded
                | ErrorType::ConfirmationRequired
                | ErrorType::LoopDetected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Validation => "VALIDATION",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::ModeRestricted => "MODE_RESTRICTED",
            ErrorType::BudgetExceeded => "BUDGET_EXCEEDED",
            ErrorType::ConfirmationRequired => "CONFIRMATION_REQUIRED",
            ErrorType::LoopDetected => "LOOP_DETECTED",
            ErrorType::SessionInactive => "SESSION_INACTIVE",
            ErrorType::Transient => "TRANSIENT",
            ErrorType::Permanent => "PERMANENT",
            ErrorType::RateLimit => "RATE_LIMIT",
            ErrorType::Auth => "AUTH",
            ErrorType::Conflict => "CONFLICT",
            ErrorType::Internal => "INTERNAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolError {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Set by handlers that failed after performing part of their work
    #[serde(default)]
    pub partial_side_effects: bool,
}

impl ToolError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            retryable: error_type.retryable_by_default(),
            details: None,
            partial_side_effects: false,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Permanent, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Internal, message).with_partial_side_effects()
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_partial_side_effects(mut self) -> Self {
        self.partial_side_effects = true;
        self
    }
}

/// Pending confirmation handed back to the caller with `CONFIRMATION_REQUIRED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub token: String,
    pub preview: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    pub tool_id: String,
    pub tool_version: String,
    pub registry_version: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_hit: bool,
}

/// What a handler produces. The registry wraps it into a [`ToolResponse`].
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success {
        data: Option<Value>,
        intents: Vec<Intent>,
    },
    Failure {
        error: ToolError,
        intents: Vec<Intent>,
    },
}

impl ToolOutcome {
    pub fn ok(data: Value) -> Self {
        ToolOutcome::Success {
            data: Some(data),
            intents: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        ToolOutcome::Success {
            data: None,
            intents: Vec::new(),
        }
    }

    pub fn fail(error: ToolError) -> Self {
        ToolOutcome::Failure {
            error,
            intents: Vec::new(),
        }
    }

    pub fn with_intent(mut self, intent: Intent) -> Self {
        match &mut self {
            ToolOutcome::Success { intents, .. } | ToolOutcome::Failure { intents, .. } => {
                intents.push(intent)
            }
        }
        self
    }
}

/// Envelope returned by every execution. `meta` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents: Vec<Intent>,
    pub meta: ResponseMeta,
}

impl ToolResponse {
    pub fn from_outcome(outcome: ToolOutcome, meta: ResponseMeta) -> Self {
        match outcome {
            ToolOutcome::Success { data, intents } => Self {
                ok: true,
                data,
                error: None,
                intents,
                meta,
            },
            ToolOutcome::Failure { error, intents } => Self {
                ok: false,
                data: None,
                error: Some(error),
                intents,
                meta,
            },
        }
    }

    /// A failure produced before any handler ran, so no side effects occurred.
    pub fn rejected(mut error: ToolError, meta: ResponseMeta) -> Self {
        error.partial_side_effects = false;
        Self::from_outcome(ToolOutcome::fail(error), meta)
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        self.error.as_ref().map(|e| e.error_type)
    }

    pub fn is_retryable(&self) -> bool {
        self.error.as_ref().is_some_and(|e| e.retryable)
    }

    pub fn confirmation_request(&self) -> Option<ConfirmationRequest> {
        let details = self.error.as_ref()?.details.as_ref()?;
        serde_json::from_value(details.get("confirmation_request")?.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ResponseMeta {
        ResponseMeta {
            tool_id: "echo".to_string(),
            tool_version: "1.0.0".to_string(),
            registry_version: "abc123".to_string(),
            duration_ms: 3,
            cache_hit: false,
        }
    }

    #[test]
    fn success_envelope_shape() {
        let resp = ToolResponse::from_outcome(
            ToolOutcome::ok(serde_json::json!({"hits": 2}))
                .with_intent(Intent::SuppressAudio { suppressed: true }),
            meta(),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["data"]["hits"], 2);
        assert!(json.get("error").is_none());
        assert_eq!(json["intents"][0]["type"], "suppress_audio");
        assert_eq!(json["meta"]["toolId"], "echo");
        assert_eq!(json["meta"]["registryVersion"], "abc123");
        assert!(json["meta"].get("cacheHit").is_none());
    }

    #[test]
    fn failure_envelope_shape() {
        let resp = ToolResponse::from_outcome(
            ToolOutcome::fail(ToolError::internal("boom")),
            meta(),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["ok"], false);
        assert!(json.get("data").is_none());
        assert_eq!(json["error"]["type"], "INTERNAL");
        assert_eq!(json["error"]["retryable"], false);
        assert_eq!(json["error"]["partialSideEffects"], true);
    }

    #[test]
    fn rejected_never_claims_side_effects() {
        let resp = ToolResponse::rejected(
            ToolError::new(ErrorType::BudgetExceeded, "cap").with_partial_side_effects(),
            meta(),
        );
        assert!(!resp.error.unwrap().partial_side_effects);
    }

    #[test]
    fn retryability_defaults() {
        assert!(ToolError::transient("timeout").retryable);
        assert!(ToolError::new(ErrorType::RateLimit, "slow down").retryable);
        assert!(!ToolError::validation("bad").retryable);
        assert!(!ToolError::permanent("gone").retryable);
    }

    #[test]
    fn confirmation_request_extraction() {
        let request = ConfirmationRequest {
            token: "tok-1".to_string(),
            preview: "Send email".to_string(),
            expires_at: Utc::now(),
        };
        let error = ToolError::new(ErrorType::ConfirmationRequired, "confirm first").with_details(
            serde_json::json!({ "confirmation_request": request }),
        );
        let resp = ToolResponse::rejected(error, meta());
        assert_eq!(resp.confirmation_request().unwrap().token, "tok-1");
    }
}
