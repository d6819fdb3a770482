use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use palaver_core::ToolOutcome;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::registry::RegistryError;

/// Executable code behind a tool definition.
///
/// Handlers receive arguments that already passed schema validation and
/// return an outcome. They never mutate session state: state changes are
/// requested by attaching intents to the outcome. An `Err` is treated as an
/// unexpected failure and normalized to `INTERNAL` by the registry.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome>;
}

/// Startup-time table mapping handler keys (the `handler` field of a tool
/// definition) to executable handlers.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Returns error if the key is already taken.
    pub fn register(
        &mut self,
        key: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), RegistryError> {
        let key = key.into();
        if self.handlers.contains_key(&key) {
            return Err(RegistryError::DuplicateHandler(key));
        }
        self.handlers.insert(key, Arc::new(handler));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.get(key).cloned()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handlers for tests: echoing, counting, failing and panicking.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use palaver_core::{Intent, ToolError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Returns its arguments as data and counts invocations.
    #[derive(Clone, Default)]
    pub struct CountingHandler {
        calls: Arc<AtomicUsize>,
        intents: Vec<Intent>,
    }

    impl CountingHandler {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_intent(mut self, intent: Intent) -> Self {
            self.intents.push(intent);
            self
        }

        /// Shared counter, still readable after the handler moves into a table.
        pub fn counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl ToolHandler for CountingHandler {
        async fn call(&self, args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcome = ToolOutcome::ok(args);
            for intent in &self.intents {
                outcome = outcome.with_intent(intent.clone());
            }
            Ok(outcome)
        }
    }

    /// Plays back a fixed sequence of outcomes, then repeats the last one.
    pub struct ScriptedHandler {
        outcomes: Mutex<Vec<ToolOutcome>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedHandler {
        pub fn new(outcomes: Vec<ToolOutcome>) -> Self {
            let mut outcomes = outcomes;
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn counter(&self) -> Arc<AtomicUsize> {
            self.calls.clone()
        }
    }

    #[async_trait]
    impl ToolHandler for ScriptedHandler {
        async fn call(&self, _args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            let next = if outcomes.len() > 1 {
                outcomes.pop()
            } else {
                outcomes.last().cloned()
            };
            Ok(next.unwrap_or_else(|| ToolOutcome::fail(ToolError::permanent("script exhausted"))))
        }
    }

    pub struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(&self, _args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
            anyhow::bail!("database connection reset")
        }
    }

    pub struct PanickingHandler;

    #[async_trait]
    impl ToolHandler for PanickingHandler {
        async fn call(&self, _args: Value, _ctx: &ExecutionContext) -> anyhow::Result<ToolOutcome> {
            panic!("handler bug")
        }
    }
}
