use async_trait::async_trait;
use palaver_core::{ToolError, ToolOutcome};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::handler::ToolHandler;

#[derive(Deserialize)]
struct Args {
    name: String,
    email: String,
    message: String,
    #[serde(default)]
    preferred_time: Option<String>,
}

/// Forwards a contact request to the sales inbox through the session's
/// message capability.
pub struct SendContactRequestHandler;

#[async_trait]
impl ToolHandler for SendContactRequestHandler {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
        let args: Args = serde_json::from_value(args)?;
        let reference = Uuid::new_v4().to_string();

        let mut body = format!(
            "From: {} <{}>\nReference: {reference}\n\n{}",
            args.name, args.email, args.message
        );
        if let Some(when) = &args.preferred_time {
            body.push_str(&format!("\n\nPreferred time: {when}"));
        }

        if let Err(e) = ctx
            .deliver_message(&format!("Contact request from {}", args.name), &body)
            .await
        {
            warn!(session_id = %ctx.session_id, error = %e, "contact request delivery failed");
            return Ok(ToolOutcome::fail(ToolError::transient(format!(
                "could not deliver the request: {e}"
            ))));
        }

        ctx.audit(
            "contact_request_sent",
            json!({ "reference": reference, "email": args.email }),
        );
        Ok(ToolOutcome::ok(json!({ "status": "sent", "reference": reference })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::mock::RecordingSink;
    use crate::state::SessionView;
    use palaver_core::{ErrorType, Mode};

    fn args() -> Value {
        json!({
            "name": "Ada",
            "email": "ada@example.com",
            "message": "Please call me about the team plan.",
            "preferred_time": "2026-10-20T09:00:00Z"
        })
    }

    #[tokio::test]
    async fn delivers_and_audits() {
        let sink = RecordingSink::new();
        let ctx = ExecutionContext::new(
            SessionView::new("s-1", Mode::Text),
            "send_contact_request",
            None,
            sink.capabilities(),
        );
        let outcome = SendContactRequestHandler.call(args(), &ctx).await.unwrap();
        assert!(matches!(outcome, ToolOutcome::Success { .. }));

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].body.contains("Preferred time: 2026-10-20T09:00:00Z"));
        assert_eq!(sink.events()[0].action, "contact_request_sent");
    }

    #[tokio::test]
    async fn missing_delivery_is_transient_failure() {
        let ctx = ExecutionContext::detached("send_contact_request", Mode::Text);
        let outcome = SendContactRequestHandler.call(args(), &ctx).await.unwrap();
        match outcome {
            ToolOutcome::Failure { error, .. } => assert_eq!(error.error_type, ErrorType::Transient),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
