//! Per-call execution context.
//!
//! Handlers get a read-only view of the session plus the capabilities they
//! may use (message delivery, audit). Nothing here can mutate session state.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use palaver_core::Mode;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::state::SessionView;

/// Delivers a message to a human outside the conversation (e.g. a sales inbox).
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, session_id: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Receives audit events for side-effecting actions.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEvent {
    pub session_id: String,
    pub tool_id: String,
    pub action: String,
    pub detail: Value,
    pub at: DateTime<Utc>,
}

/// Audit sink that writes events to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: AuditEvent) {
        info!(
            session_id = %event.session_id,
            tool_id = %event.tool_id,
            action = %event.action,
            detail = %event.detail,
            "audit"
        );
    }
}

/// Message sink for deployments without outbound delivery. Always fails, so
/// tools depending on it report an error instead of pretending to succeed.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullMessageSink;

#[async_trait]
impl MessageSink for NullMessageSink {
    async fn deliver(&self, _session_id: &str, _subject: &str, _body: &str) -> anyhow::Result<()> {
        anyhow::bail!("no message delivery configured")
    }
}

/// Capability set shared by every call in a session.
#[derive(Clone)]
pub struct Capabilities {
    pub messages: Arc<dyn MessageSink>,
    pub audit: Arc<dyn AuditSink>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            messages: Arc::new(NullMessageSink),
            audit: Arc::new(TracingAudit),
        }
    }
}

pub struct ExecutionContext {
    pub session_id: String,
    pub turn: u64,
    pub mode: Mode,
    pub tool_id: String,
    /// Provider call identifier, when the model supplied one
    pub call_id: Option<String>,
    session: SessionView,
    capabilities: Capabilities,
}

impl ExecutionContext {
    pub fn new(
        session: SessionView,
        tool_id: impl Into<String>,
        call_id: Option<String>,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            session_id: session.session_id.clone(),
            turn: session.turn,
            mode: session.mode,
            tool_id: tool_id.into(),
            call_id,
            session,
            capabilities,
        }
    }

    /// Context for executing outside an orchestrated session (CLI, tests).
    pub fn detached(tool_id: impl Into<String>, mode: Mode) -> Self {
        Self::new(
            SessionView::new("detached", mode),
            tool_id,
            None,
            Capabilities::default(),
        )
    }

    pub fn session(&self) -> &SessionView {
        &self.session
    }

    pub async fn deliver_message(&self, subject: &str, body: &str) -> anyhow::Result<()> {
        self.capabilities
            .messages
            .deliver(&self.session_id, subject, body)
            .await
    }

    pub fn audit(&self, action: impl Into<String>, detail: Value) {
        self.capabilities.audit.record(AuditEvent {
            session_id: self.session_id.clone(),
            tool_id: self.tool_id.clone(),
            action: action.into(),
            detail,
            at: Utc::now(),
        });
    }
}

/// Capability doubles that record what they receive.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub struct DeliveredMessage {
        pub session_id: String,
        pub subject: String,
        pub body: String,
    }

    #[derive(Default)]
    pub struct RecordingSink {
        pub messages: Mutex<Vec<DeliveredMessage>>,
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub fn capabilities(self: &Arc<Self>) -> Capabilities {
            Capabilities {
                messages: self.clone(),
                audit: self.clone(),
            }
        }

        pub fn messages(&self) -> Vec<DeliveredMessage> {
            self.messages.lock().unwrap().clone()
        }

        pub fn events(&self) -> Vec<AuditEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn deliver(&self, session_id: &str, subject: &str, body: &str) -> anyhow::Result<()> {
            self.messages.lock().unwrap().push(DeliveredMessage {
                session_id: session_id.to_string(),
                subject: subject.to_string(),
                body: body.to_string(),
            });
            Ok(())
        }
    }

    impl AuditSink for RecordingSink {
        fn record(&self, event: AuditEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
