//! The seam between the orchestrator and an LLM provider connection.
//!
//! A transport turns raw provider output into proposed calls and hands tool
//! responses back. Text transports return the model's next message from
//! `deliver`; voice transports usually return `None` and let the realtime
//! stream continue on its own.

use async_trait::async_trait;
use palaver_core::{Mode, ToolResponse};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

/// A tool call the model wants to make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedCall {
    pub tool_id: String,
    #[serde(default)]
    pub arguments: Value,
    /// Provider call identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Whether `call_id` stays the same when the provider re-sends the call
    #[serde(default)]
    pub stable_call_id: bool,
    /// Out-of-band confirmation. Never part of `arguments`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<String>,
}

impl ProposedCall {
    pub fn new(tool_id: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_id: tool_id.into(),
            arguments,
            call_id: None,
            stable_call_id: false,
            confirmation_token: None,
        }
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>, stable: bool) -> Self {
        self.call_id = Some(call_id.into());
        self.stable_call_id = stable;
        self
    }

    pub fn with_confirmation(mut self, token: impl Into<String>) -> Self {
        self.confirmation_token = Some(token.into());
        self
    }
}

/// One model output: optional visible text plus the provider's raw payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub raw: Value,
}

impl ModelMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            raw: Value::Null,
        }
    }

    pub fn raw(raw: Value) -> Self {
        Self { text: None, raw }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Provider connection closed")]
    Closed,
    #[error("A {session} session cannot be driven as a {driver} turn")]
    WrongMode { session: Mode, driver: Mode },
    #[error("Provider error: {0}")]
    Provider(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[async_trait]
pub trait ModelTransport: Send + Sync {
    fn extract_calls(&self, message: &ModelMessage) -> Vec<ProposedCall>;

    /// Hand one response back to the model. Returns the model's next output
    /// when the provider produces one in reply.
    async fn deliver(
        &self,
        call: &ProposedCall,
        response: &ToolResponse,
    ) -> Result<Option<ModelMessage>, TransportError>;
}

/// The serialized envelope sent back to the model as the tool result.
pub fn envelope_payload(response: &ToolResponse) -> String {
    serde_json::to_string(response).unwrap_or_else(|e| {
        warn!(error = %e, "failed to serialize tool response");
        json!({"ok": false, "error": {"type": "INTERNAL", "message": "unserializable response", "retryable": false}})
            .to_string()
    })
}

/// Calls from an OpenAI chat completion message
/// (`{"tool_calls": [{"id", "function": {"name", "arguments"}}]}`).
/// Arguments arrive as a JSON string; unparseable strings become `null` and
/// fail validation downstream.
pub fn openai_tool_calls(message: &Value) -> Vec<ProposedCall> {
    let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| {
            let function = call.get("function")?;
            let name = function.get("name")?.as_str()?;
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::Null),
                Some(other) => other.clone(),
                None => Value::Null,
            };
            let mut proposed = ProposedCall::new(name, arguments);
            if let Some(id) = call.get("id").and_then(Value::as_str) {
                proposed = proposed.with_call_id(id, true);
            }
            Some(proposed)
        })
        .collect()
}

/// Calls from an Anthropic message (`content` blocks of type `tool_use`).
pub fn anthropic_tool_uses(message: &Value) -> Vec<ProposedCall> {
    let Some(blocks) = message.get("content").and_then(Value::as_array) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|block| {
            let name = block.get("name")?.as_str()?;
            let input = block.get("input").cloned().unwrap_or(Value::Null);
            let mut proposed = ProposedCall::new(name, input);
            if let Some(id) = block.get("id").and_then(Value::as_str) {
                proposed = proposed.with_call_id(id, true);
            }
            Some(proposed)
        })
        .collect()
}

/// OpenAI `role: tool` message answering `call`.
pub fn openai_tool_message(call: &ProposedCall, response: &ToolResponse) -> Value {
    json!({
        "role": "tool",
        "tool_call_id": call.call_id,
        "content": envelope_payload(response),
    })
}

/// Anthropic `tool_result` content block answering `call`.
pub fn anthropic_tool_result(call: &ProposedCall, response: &ToolResponse) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": call.call_id,
        "content": envelope_payload(response),
        "is_error": !response.ok,
    })
}

/// Transport that plays back a scripted conversation.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Model messages carry their calls in `raw.calls` as serialized
    /// [`ProposedCall`]s. After the last call of a message is delivered, the
    /// next queued message is returned as the model's reply.
    #[derive(Default)]
    pub struct ScriptedTransport {
        replies: Mutex<VecDeque<ModelMessage>>,
        outstanding: Mutex<usize>,
        delivered: Mutex<Vec<(ProposedCall, ToolResponse)>>,
    }

    impl ScriptedTransport {
        pub fn new(replies: Vec<ModelMessage>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            }
        }

        pub fn message(text: Option<&str>, calls: Vec<ProposedCall>) -> ModelMessage {
            ModelMessage {
                text: text.map(str::to_string),
                raw: json!({ "calls": calls }),
            }
        }

        pub fn delivered(&self) -> Vec<(ProposedCall, ToolResponse)> {
            self.delivered.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ModelTransport for ScriptedTransport {
        fn extract_calls(&self, message: &ModelMessage) -> Vec<ProposedCall> {
            let calls: Vec<ProposedCall> = message
                .raw
                .get("calls")
                .cloned()
                .and_then(|c| serde_json::from_value(c).ok())
                .unwrap_or_default();
            *self.outstanding.lock().unwrap() = calls.len();
            calls
        }

        async fn deliver(
            &self,
            call: &ProposedCall,
            response: &ToolResponse,
        ) -> Result<Option<ModelMessage>, TransportError> {
            self.delivered
                .lock()
                .unwrap()
                .push((call.clone(), response.clone()));
            let mut outstanding = self.outstanding.lock().unwrap();
            *outstanding = outstanding.saturating_sub(1);
            if *outstanding == 0 {
                Ok(self.replies.lock().unwrap().pop_front())
            } else {
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::ResponseMeta;

    #[test]
    fn openai_arguments_are_parsed_from_string() {
        let message = json!({
            "role": "assistant",
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": {"name": "search_knowledge", "arguments": "{\"query\": \"pricing\"}"}
            }]
        });
        let calls = openai_tool_calls(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].tool_id, "search_knowledge");
        assert_eq!(calls[0].arguments, json!({"query": "pricing"}));
        assert_eq!(calls[0].call_id.as_deref(), Some("call_1"));
        assert!(calls[0].stable_call_id);
    }

    #[test]
    fn openai_garbage_arguments_become_null() {
        let message = json!({"tool_calls": [{"id": "c", "function": {"name": "t", "arguments": "{nope"}}]});
        assert_eq!(openai_tool_calls(&message)[0].arguments, Value::Null);
    }

    #[test]
    fn anthropic_tool_use_blocks() {
        let message = json!({
            "content": [
                {"type": "text", "text": "Let me check."},
                {"type": "tool_use", "id": "toolu_1", "name": "get_document", "input": {"document_id": "d1"}}
            ]
        });
        let calls = anthropic_tool_uses(&message);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["document_id"], "d1");
    }

    #[test]
    fn tool_result_carries_full_envelope() {
        let response = ToolResponse {
            ok: true,
            data: Some(json!({"hits": []})),
            error: None,
            intents: Vec::new(),
            meta: ResponseMeta {
                tool_id: "search_knowledge".to_string(),
                tool_version: "1.0.0".to_string(),
                registry_version: "abc".to_string(),
                duration_ms: 4,
                cache_hit: false,
            },
        };
        let call = ProposedCall::new("search_knowledge", json!({})).with_call_id("toolu_1", true);
        let block = anthropic_tool_result(&call, &response);
        let payload: Value = serde_json::from_str(block["content"].as_str().unwrap()).unwrap();
        assert_eq!(payload["meta"]["registryVersion"], "abc");
        assert_eq!(block["is_error"], false);
    }
}
