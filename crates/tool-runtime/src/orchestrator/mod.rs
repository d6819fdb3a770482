//! Per-session orchestration of tool calls.
//!
//! Every proposed call passes the same gates in a fixed order: mode,
//! idempotency cache, loop detection, budgets, confirmation. Only then does
//! the handler run, after which the response is cached and its intents are
//! applied. Rejections carry a full envelope so the model can react.

mod chain;
mod confirmation;
mod loops;

pub use chain::{CallRecord, StopReason, TurnReport};
pub use confirmation::{ConfirmationStore, Redemption};
pub use loops::LoopDetector;

use std::sync::Arc;
use std::time::Duration;

use palaver_core::canonical::canonical_hash;
use palaver_core::config::OrchestratorConfig;
use palaver_core::{ErrorType, Mode, SideEffects, ToolError, ToolOutcome, ToolResponse};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::context::{Capabilities, ExecutionContext};
use crate::registry::{RegistrySnapshot, RuntimeRegistry, ToolMetadata};
use crate::state::StateController;
use crate::transport::ProposedCall;

/// Opens sessions against the registry's current snapshot.
pub struct Orchestrator {
    registry: Arc<RuntimeRegistry>,
    config: OrchestratorConfig,
    capabilities: Capabilities,
}

impl Orchestrator {
    pub fn new(registry: Arc<RuntimeRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            config,
            capabilities: Capabilities::default(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn registry(&self) -> &Arc<RuntimeRegistry> {
        &self.registry
    }

    /// The session keeps the snapshot current at this moment for its whole life.
    pub fn open_session(&self, session_id: impl Into<String>, mode: Mode) -> Session {
        let session_id = session_id.into();
        let registry = self.registry.snapshot();
        info!(
            session_id = %session_id,
            mode = %mode,
            registry_version = %registry.version(),
            "session opened"
        );
        Session {
            mode,
            state: StateController::new(session_id, mode, self.config.idempotency_cache_size),
            confirmations: ConfirmationStore::new(self.config.confirmation_ttl_secs),
            loops: LoopDetector::default(),
            registry,
            config: self.config.clone(),
            capabilities: self.capabilities.clone(),
        }
    }
}

pub struct Session {
    mode: Mode,
    registry: Arc<RegistrySnapshot>,
    config: OrchestratorConfig,
    capabilities: Capabilities,
    state: StateController,
    confirmations: ConfirmationStore,
    loops: LoopDetector,
}

impl Session {
    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn registry(&self) -> &RegistrySnapshot {
        &self.registry
    }

    /// Handle to this session's state. Clones may be moved to other tasks.
    pub fn state(&self) -> StateController {
        self.state.clone()
    }

    /// A new user turn. Budgets and loop detection start over.
    pub fn begin_turn(&mut self) {
        let turn = self.state.begin_turn();
        self.loops.reset();
        debug!(turn, "turn started");
    }

    /// A new model output within the current turn.
    pub fn begin_model_turn(&mut self) {
        self.state.begin_model_turn();
    }

    /// The user confirmed a pending action out of band.
    pub fn present_confirmation(&mut self, token: impl Into<String>) {
        self.confirmations.present(token);
    }

    /// Output reached the user. Completes a pending end-after-farewell.
    pub fn output_delivered(&self) -> bool {
        self.state.mark_output_delivered()
    }

    /// The connection is gone. In-flight results will be discarded.
    pub fn close(&self) {
        self.state.close();
    }

    /// Run one proposed call through every gate and, if it passes, execute it.
    pub async fn handle_call(&mut self, call: ProposedCall) -> ToolResponse {
        let tool_id = call.tool_id.as_str();
        if !self.state.is_active() {
            return self.reject(
                tool_id,
                ToolError::new(ErrorType::SessionInactive, "session is no longer active"),
            );
        }
        let Some(meta) = self.registry.metadata(tool_id) else {
            return self.reject(
                tool_id,
                ToolError::new(ErrorType::NotFound, format!("unknown tool '{tool_id}'")),
            );
        };

        if !meta.allows_mode(self.mode) {
            return self.reject(
                tool_id,
                ToolError::new(
                    ErrorType::ModeRestricted,
                    format!("'{tool_id}' is not available in {} mode", self.mode),
                )
                .with_details(json!({ "allowedModes": meta.allowed_modes })),
            );
        }

        let normalized = self.registry.normalized_arguments(tool_id, &call.arguments);
        let args_hash = canonical_hash(&normalized);
        let key = self.idempotency_key(&call, &args_hash);
        if let Some(mut cached) = self.state.cached(&key) {
            debug!(tool_id, key = %key, "idempotency cache hit");
            cached.meta.cache_hit = true;
            return cached;
        }

        if self.loops.seen(tool_id, &args_hash) {
            return self.reject(
                tool_id,
                ToolError::new(
                    ErrorType::LoopDetected,
                    format!("'{tool_id}' was already called with these arguments this turn"),
                )
                .with_details(json!({
                    "hint": "use the earlier result, change the arguments, or answer the user"
                })),
            );
        }

        let view = self.state.view();
        let budget = self.config.budget(self.mode);
        if view.total_calls_this_turn >= budget.max_total_calls {
            return self.reject(
                tool_id,
                ToolError::new(ErrorType::BudgetExceeded, "tool call limit for this turn reached")
                    .with_details(json!({ "limit": "total_calls", "max": budget.max_total_calls })),
            );
        }
        if meta.is_retrieval() && view.retrieval_calls_this_turn >= budget.max_retrieval_calls {
            return self.reject(
                tool_id,
                ToolError::new(ErrorType::BudgetExceeded, "retrieval limit for this turn reached")
                    .with_details(json!({
                        "limit": "retrieval_calls",
                        "max": budget.max_retrieval_calls
                    })),
            );
        }

        if meta.requires_confirmation {
            if let Some(rejection) = self.confirmation_gate(&call, &args_hash) {
                return rejection;
            }
        }

        self.loops.record(tool_id, &args_hash);
        self.state.record_call(meta.is_retrieval());
        let response = self.execute(&call, &meta).await;

        if !self.state.is_active() {
            warn!(tool_id, "session closed while the call was in flight; discarding result");
            let mut error = ToolError::new(
                ErrorType::SessionInactive,
                "session closed before the result could be used",
            );
            if meta.side_effects == SideEffects::Writes {
                error = error.with_partial_side_effects();
            }
            return ToolResponse::from_outcome(ToolOutcome::fail(error), response.meta);
        }

        self.state.cache(key, response.clone());
        for intent in &response.intents {
            self.state.apply(intent);
        }
        info!(
            tool_id,
            ok = response.ok,
            error_type = response.error_type().map(ErrorType::as_str).unwrap_or("-"),
            duration_ms = response.meta.duration_ms,
            "tool call finished"
        );
        response
    }

    /// Stable provider call ids key the cache directly. Otherwise the key is
    /// the tool, its canonical arguments and the current turn counters, so a
    /// re-sent model output is served from cache.
    fn idempotency_key(&self, call: &ProposedCall, args_hash: &str) -> String {
        match (&call.call_id, call.stable_call_id) {
            (Some(id), true) => format!("call:{id}"),
            _ => {
                let view = self.state.view();
                format!(
                    "args:{}:{}:{}:{}",
                    call.tool_id, args_hash, view.turn, view.model_turn
                )
            }
        }
    }

    fn confirmation_gate(&mut self, call: &ProposedCall, args_hash: &str) -> Option<ToolResponse> {
        let token = call
            .confirmation_token
            .clone()
            .or_else(|| self.confirmations.presented_for(&call.tool_id, args_hash));
        let message = match token {
            None => "this action needs the user's confirmation",
            Some(token) => match self.confirmations.redeem(&token, &call.tool_id, args_hash) {
                Redemption::Accepted => {
                    info!(tool_id = %call.tool_id, "confirmation accepted");
                    return None;
                }
                Redemption::Expired => "confirmation expired; ask the user to confirm again",
                Redemption::Invalid => "confirmation token is not valid for this call",
            },
        };
        let request = self
            .confirmations
            .issue(&call.tool_id, args_hash, &call.arguments);
        Some(self.reject(
            &call.tool_id,
            ToolError::new(ErrorType::ConfirmationRequired, message)
                .with_details(json!({ "confirmation_request": request })),
        ))
    }

    async fn execute(&self, call: &ProposedCall, meta: &ToolMetadata) -> ToolResponse {
        let response = self.execute_once(call).await;
        if self.mode == Mode::Text
            && meta.idempotent
            && response.error_type() == Some(ErrorType::Transient)
            && response.is_retryable()
        {
            warn!(
                tool_id = %call.tool_id,
                backoff_ms = self.config.retry_backoff_ms,
                "retrying transient failure"
            );
            tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
            return self.execute_once(call).await;
        }
        response
    }

    async fn execute_once(&self, call: &ProposedCall) -> ToolResponse {
        let ctx = ExecutionContext::new(
            self.state.view(),
            &call.tool_id,
            call.call_id.clone(),
            self.capabilities.clone(),
        );
        self.registry
            .execute(&call.tool_id, call.arguments.clone(), &ctx)
            .await
    }

    fn reject(&self, tool_id: &str, error: ToolError) -> ToolResponse {
        info!(
            tool_id,
            error_type = error.error_type.as_str(),
            message = %error.message,
            "call rejected before execution"
        );
        ToolResponse::rejected(error, self.registry.rejection_meta(tool_id))
    }
}
