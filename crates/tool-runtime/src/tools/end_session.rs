use async_trait::async_trait;
use palaver_core::{EndTrigger, Intent, ToolOutcome};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::context::ExecutionContext;
use crate::handler::ToolHandler;

#[derive(Deserialize)]
struct Args {
    reason: String,
    #[serde(default)]
    immediate: bool,
}

/// Asks the state controller to end the conversation. Abusive sessions
/// also stop being transcribed.
pub struct EndSessionHandler;

#[async_trait]
impl ToolHandler for EndSessionHandler {
    async fn call(&self, args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
        let args: Args = serde_json::from_value(args)?;
        let trigger = if args.immediate {
            EndTrigger::Immediate
        } else {
            EndTrigger::AfterFarewell
        };

        let mut outcome = ToolOutcome::ok(json!({ "ending": true, "reason": args.reason }))
            .with_intent(Intent::EndSession { trigger });
        if args.reason == "abusive" {
            outcome = outcome.with_intent(Intent::SuppressTranscript { suppressed: true });
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_core::Mode;

    async fn intents(args: Value) -> Vec<Intent> {
        let ctx = ExecutionContext::detached("end_session", Mode::Voice);
        match EndSessionHandler.call(args, &ctx).await.unwrap() {
            ToolOutcome::Success { intents, .. } => intents,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn defaults_to_after_farewell() {
        let intents = intents(json!({"reason": "user_goodbye", "immediate": false})).await;
        assert_eq!(
            intents,
            vec![Intent::EndSession {
                trigger: EndTrigger::AfterFarewell
            }]
        );
    }

    #[tokio::test]
    async fn abusive_ends_immediately_without_transcript() {
        let intents = intents(json!({"reason": "abusive", "immediate": true})).await;
        assert_eq!(intents.len(), 2);
        assert_eq!(
            intents[0],
            Intent::EndSession {
                trigger: EndTrigger::Immediate
            }
        );
    }
}
