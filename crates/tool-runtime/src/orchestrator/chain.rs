//! Turn-level drivers: chained calls for text, one call per output for voice.

use palaver_core::{ErrorType, Mode, ToolError, ToolResponse};
use serde_json::json;
use tracing::{debug, info};

use super::Session;
use crate::transport::{ModelMessage, ModelTransport, ProposedCall, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    /// The model answered without proposing another call
    #[default]
    Completed,
    /// The chain-length cap was hit; further calls were refused
    DepthLimit,
    /// A call failed with a non-retryable error
    Error(ErrorType),
    SessionEnded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub call: ProposedCall,
    pub response: ToolResponse,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnReport {
    pub calls: Vec<CallRecord>,
    /// Latest visible text from the model
    pub final_text: Option<String>,
    /// User-visible notices appended after the model's text
    pub notices: Vec<String>,
    pub stop: StopReason,
    /// Model output that arrived but was not acted on
    pub unprocessed: Option<ModelMessage>,
}

impl TurnReport {
    /// What the user sees: the model's text followed by any notices.
    pub fn user_output(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(text) = self.final_text.as_deref().filter(|t| !t.is_empty()) {
            parts.push(text);
        }
        parts.extend(self.notices.iter().map(String::as_str));
        parts.join("\n\n")
    }

    pub fn executed_calls(&self) -> usize {
        self.calls
            .iter()
            .filter(|r| !r.response.meta.cache_hit && !is_gate_rejection(&r.response))
            .count()
    }
}

fn is_gate_rejection(response: &ToolResponse) -> bool {
    response
        .error_type()
        .is_some_and(|t| t.is_pre_execution() && t != ErrorType::Validation)
}

fn depth_limit_notice(max_calls: u32) -> String {
    format!(
        "(Stopped after {max_calls} tool calls in this turn. Ask again to continue.)"
    )
}

/// Whether the chain should stop after this response.
fn stop_after(response: &ToolResponse) -> Option<StopReason> {
    let error = response.error.as_ref()?;
    if error.error_type == ErrorType::BudgetExceeded
        && error
            .details
            .as_ref()
            .and_then(|d| d.get("limit"))
            .and_then(|l| l.as_str())
            == Some("total_calls")
    {
        return Some(StopReason::DepthLimit);
    }
    if error.retryable {
        None
    } else {
        Some(StopReason::Error(error.error_type))
    }
}

impl Session {
    fn require_mode(&self, driver: Mode) -> Result<(), TransportError> {
        if self.mode == driver {
            Ok(())
        } else {
            Err(TransportError::WrongMode {
                session: self.mode,
                driver,
            })
        }
    }

    /// Drive one text turn: execute the calls in each model output, hand the
    /// responses back, and continue with the model's reply until it stops
    /// calling tools, a call fails non-retryably, or the chain cap is hit.
    pub async fn run_text_turn(
        &mut self,
        transport: &dyn ModelTransport,
        message: ModelMessage,
    ) -> Result<TurnReport, TransportError> {
        self.require_mode(Mode::Text)?;
        self.begin_turn();
        let budget = self.config.budget(Mode::Text);
        let mut report = TurnReport::default();
        let mut message = message;

        loop {
            if message.text.is_some() {
                report.final_text = message.text.clone();
            }
            let calls = transport.extract_calls(&message);
            if calls.is_empty() {
                report.stop = StopReason::Completed;
                break;
            }

            self.begin_model_turn();
            let mut stop: Option<StopReason> = None;
            let mut reply: Option<ModelMessage> = None;
            for call in calls {
                let response = self.handle_call(call.clone()).await;
                if let Some(reason) = stop_after(&response) {
                    stop.get_or_insert(reason);
                }
                if let Some(next) = transport.deliver(&call, &response).await? {
                    reply = Some(next);
                }
                report.calls.push(CallRecord { call, response });
            }
            if !self.state.is_active() {
                stop = Some(StopReason::SessionEnded);
            }

            match (stop, reply) {
                (Some(reason), reply) => {
                    if let Some(text) = reply.as_ref().and_then(|m| m.text.clone()) {
                        report.final_text = Some(text);
                    }
                    if reason == StopReason::DepthLimit {
                        report.notices.push(depth_limit_notice(budget.max_total_calls));
                    }
                    report.stop = reason;
                    report.unprocessed = reply;
                    break;
                }
                (None, Some(next)) => message = next,
                (None, None) => {
                    report.stop = StopReason::Completed;
                    break;
                }
            }
        }

        info!(
            calls = report.calls.len(),
            executed = report.executed_calls(),
            stop = ?report.stop,
            "text turn finished"
        );
        Ok(report)
    }

    /// Serve one voice model output: at most one call runs, never retried.
    /// Extra calls in the same output are refused. The provider's reply, if
    /// any, is left in `unprocessed` for the caller's stream loop.
    pub async fn serve_voice_output(
        &mut self,
        transport: &dyn ModelTransport,
        message: ModelMessage,
    ) -> Result<TurnReport, TransportError> {
        self.require_mode(Mode::Voice)?;
        let mut report = TurnReport {
            final_text: message.text.clone(),
            ..TurnReport::default()
        };
        let calls = transport.extract_calls(&message);
        if calls.is_empty() {
            return Ok(report);
        }

        self.begin_model_turn();
        for (index, call) in calls.into_iter().enumerate() {
            let response = if index == 0 {
                self.handle_call(call.clone()).await
            } else {
                debug!(tool_id = %call.tool_id, "refusing extra call in voice output");
                self.reject(
                    &call.tool_id,
                    ToolError::new(
                        ErrorType::BudgetExceeded,
                        "only one tool call is served per voice response",
                    )
                    .with_details(json!({ "limit": "calls_per_output", "max": 1 })),
                )
            };
            if let Some(next) = transport.deliver(&call, &response).await? {
                report.unprocessed = Some(next);
            }
            report.calls.push(CallRecord { call, response });
        }
        if !self.state.is_active() {
            report.stop = StopReason::SessionEnded;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::mock::CountingHandler;
    use crate::handler::HandlerTable;
    use crate::orchestrator::Orchestrator;
    use crate::registry::RuntimeRegistry;
    use crate::testing::{artifact, tool};
    use crate::transport::mock::ScriptedTransport;
    use palaver_core::config::OrchestratorConfig;
    use palaver_core::{EndTrigger, Intent};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn orchestrator() -> (Orchestrator, Arc<AtomicUsize>) {
        let echo = CountingHandler::new();
        let counter = echo.counter();
        let mut handlers = HandlerTable::new();
        handlers.register("test.echo", echo).unwrap();
        handlers
            .register(
                "test.end",
                CountingHandler::new().with_intent(Intent::EndSession {
                    trigger: EndTrigger::Immediate,
                }),
            )
            .unwrap();
        let registry = RuntimeRegistry::new(
            artifact(vec![
                tool("echo").handler("test.echo").build(),
                tool("search").handler("test.echo").retrieval().build(),
                tool("hangup").handler("test.end").build(),
            ]),
            handlers,
            true,
        )
        .unwrap();
        (
            Orchestrator::new(Arc::new(registry), OrchestratorConfig::default()),
            counter,
        )
    }

    fn step(tool_id: &str, n: usize) -> ModelMessage {
        ScriptedTransport::message(
            None,
            vec![ProposedCall::new(tool_id, json!({ "q": n.to_string() }))],
        )
    }

    #[tokio::test]
    async fn chain_stops_at_depth_limit_with_notice() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("t", Mode::Text);
        let mut replies: Vec<ModelMessage> = (2..=6).map(|n| step("echo", n)).collect();
        replies.push(ModelMessage::text("never reached"));
        let transport = ScriptedTransport::new(replies);

        let report = session.run_text_turn(&transport, step("echo", 1)).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 5);
        assert_eq!(report.stop, StopReason::DepthLimit);
        assert_eq!(report.calls.len(), 6);
        assert_eq!(
            report.calls[5].response.error_type(),
            Some(ErrorType::BudgetExceeded)
        );
        assert!(report.user_output().contains("Stopped after 5 tool calls"));
        assert_eq!(report.final_text.as_deref(), Some("never reached"));
    }

    #[tokio::test]
    async fn chain_completes_when_model_answers() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("t", Mode::Text);
        let transport = ScriptedTransport::new(vec![
            step("echo", 2),
            ModelMessage::text("Here is what I found."),
        ]);

        let report = session.run_text_turn(&transport, step("echo", 1)).await.unwrap();

        assert_eq!(report.stop, StopReason::Completed);
        assert_eq!(report.user_output(), "Here is what I found.");
        assert!(report.notices.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(transport.delivered().len(), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_the_chain() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("t", Mode::Text);
        let transport = ScriptedTransport::new(vec![
            ScriptedTransport::message(
                None,
                vec![ProposedCall::new("echo", json!({"q": 7}))],
            ),
            step("echo", 3),
        ]);

        let report = session.run_text_turn(&transport, step("echo", 1)).await.unwrap();

        assert_eq!(report.stop, StopReason::Error(ErrorType::Validation));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(report.unprocessed.is_some());
    }

    #[tokio::test]
    async fn loop_in_chain_never_reaches_handler() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("t", Mode::Text);
        let transport = ScriptedTransport::new(vec![step("echo", 1)]);

        let report = session.run_text_turn(&transport, step("echo", 1)).await.unwrap();

        assert_eq!(report.stop, StopReason::Error(ErrorType::LoopDetected));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn session_end_stops_the_chain() {
        let (orchestrator, _) = orchestrator();
        let mut session = orchestrator.open_session("t", Mode::Text);
        let transport = ScriptedTransport::new(vec![step("echo", 2)]);

        let report = session.run_text_turn(&transport, step("hangup", 1)).await.unwrap();

        assert_eq!(report.stop, StopReason::SessionEnded);
        assert_eq!(report.calls.len(), 1);
    }

    #[tokio::test]
    async fn voice_serves_one_call_per_output() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("v", Mode::Voice);
        let transport = ScriptedTransport::new(vec![ModelMessage::text("Let me check.")]);
        let message = ScriptedTransport::message(
            None,
            vec![
                ProposedCall::new("search", json!({"q": "a"})),
                ProposedCall::new("search", json!({"q": "b"})),
            ],
        );

        let report = session.serve_voice_output(&transport, message).await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(report.calls[0].response.ok);
        assert_eq!(
            report.calls[1].response.error_type(),
            Some(ErrorType::BudgetExceeded)
        );
        assert!(report.notices.is_empty());
        assert_eq!(
            report.unprocessed.and_then(|m| m.text).as_deref(),
            Some("Let me check.")
        );
    }

    #[tokio::test]
    async fn drivers_refuse_the_other_mode() {
        let (orchestrator, counter) = orchestrator();
        let transport = ScriptedTransport::new(vec![step("echo", 2)]);

        let mut voice = orchestrator.open_session("v", Mode::Voice);
        let result = voice.run_text_turn(&transport, step("echo", 1)).await;
        assert!(matches!(
            result,
            Err(TransportError::WrongMode { session: Mode::Voice, driver: Mode::Text })
        ));

        let mut text = orchestrator.open_session("t", Mode::Text);
        assert!(text.serve_voice_output(&transport, step("echo", 1)).await.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(transport.delivered().is_empty());
    }

    #[tokio::test]
    async fn voice_budget_spans_outputs_until_next_turn() {
        let (orchestrator, counter) = orchestrator();
        let mut session = orchestrator.open_session("v", Mode::Voice);
        let transport = ScriptedTransport::new(Vec::new());
        let mut responses = Vec::new();
        for q in ["a", "b", "c"] {
            let message = ScriptedTransport::message(
                None,
                vec![ProposedCall::new("search", json!({ "q": q }))],
            );
            let report = session.serve_voice_output(&transport, message).await.unwrap();
            responses.push(report.calls[0].response.clone());
        }
        assert!(responses[0].ok && responses[1].ok);
        assert_eq!(responses[2].error_type(), Some(ErrorType::BudgetExceeded));
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        session.begin_turn();
        let message = ScriptedTransport::message(
            None,
            vec![ProposedCall::new("search", json!({"q": "c"}))],
        );
        let report = session.serve_voice_output(&transport, message).await.unwrap();
        assert!(report.calls[0].response.ok);
    }
}
