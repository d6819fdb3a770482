//! Runtime registry: the compiled artifact bound to executable handlers.
//!
//! Each load produces an immutable [`RegistrySnapshot`]. Sessions hold an
//! `Arc` to the snapshot they started with, so a reload never changes a
//! session mid-flight.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use futures::FutureExt;
use palaver_core::{
    CoreError, ErrorType, Mode, Provider, RegistryArtifact, ResponseMeta, SideEffects, ToolCategory,
    ToolDefinition, ToolError, ToolOutcome, ToolResponse,
};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::context::ExecutionContext;
use crate::handler::{HandlerTable, ToolHandler};
use crate::validation::ArgumentValidator;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Artifact(#[from] CoreError),
    #[error("Tool '{tool_id}' references unknown handler '{handler}'")]
    UnboundHandler { tool_id: String, handler: String },
    #[error("Tool '{tool_id}' has an invalid parameter schema: {message}")]
    InvalidSchema { tool_id: String, message: String },
    #[error("Tool '{0}' appears more than once in the artifact")]
    DuplicateTool(String),
    #[error("Handler '{0}' is already registered")]
    DuplicateHandler(String),
    #[error("Registry reload after lock() is not permitted in production")]
    ReloadAfterLock,
}

/// Metadata the orchestrator consults before running a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolMetadata {
    pub tool_id: String,
    pub version: String,
    pub category: ToolCategory,
    pub side_effects: SideEffects,
    pub idempotent: bool,
    pub requires_confirmation: bool,
    pub allowed_modes: Vec<Mode>,
    pub latency_budget_ms: u64,
}

impl ToolMetadata {
    pub fn allows_mode(&self, mode: Mode) -> bool {
        self.allowed_modes.contains(&mode)
    }

    pub fn is_retrieval(&self) -> bool {
        self.category == ToolCategory::Retrieval
    }
}

impl From<&ToolDefinition> for ToolMetadata {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_id: def.tool_id.clone(),
            version: def.version.clone(),
            category: def.category,
            side_effects: def.side_effects,
            idempotent: def.idempotent,
            requires_confirmation: def.requires_confirmation,
            allowed_modes: def.allowed_modes.clone(),
            latency_budget_ms: def.latency_budget_ms,
        }
    }
}

struct BoundTool {
    definition: ToolDefinition,
    validator: ArgumentValidator,
    handler: Arc<dyn ToolHandler>,
}

/// One loaded artifact with handlers and validators bound to every tool.
pub struct RegistrySnapshot {
    version: String,
    source_revision: Option<String>,
    tools: HashMap<String, BoundTool>,
    order: Vec<String>,
}

impl RegistrySnapshot {
    /// Bind every tool in `artifact`. Unknown handler keys and uncompilable
    /// schemas are startup failures.
    pub fn bind(artifact: RegistryArtifact, handlers: &HandlerTable) -> Result<Self, RegistryError> {
        let mut tools = HashMap::with_capacity(artifact.tools.len());
        let mut order = Vec::with_capacity(artifact.tools.len());

        for definition in artifact.tools {
            if tools.contains_key(&definition.tool_id) {
                return Err(RegistryError::DuplicateTool(definition.tool_id));
            }
            let handler = handlers.get(&definition.handler).ok_or_else(|| {
                RegistryError::UnboundHandler {
                    tool_id: definition.tool_id.clone(),
                    handler: definition.handler.clone(),
                }
            })?;
            let validator = ArgumentValidator::compile(&definition.parameters).map_err(|message| {
                RegistryError::InvalidSchema {
                    tool_id: definition.tool_id.clone(),
                    message,
                }
            })?;
            debug!(tool_id = %definition.tool_id, handler = %definition.handler, "bound tool");
            order.push(definition.tool_id.clone());
            tools.insert(
                definition.tool_id.clone(),
                BoundTool {
                    definition,
                    validator,
                    handler,
                },
            );
        }

        Ok(Self {
            version: artifact.version,
            source_revision: artifact.source_revision,
            tools,
            order,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn source_revision(&self) -> Option<&str> {
        self.source_revision.as_deref()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn definition(&self, tool_id: &str) -> Option<&ToolDefinition> {
        self.tools.get(tool_id).map(|t| &t.definition)
    }

    pub fn provider_schema(&self, tool_id: &str, provider: Provider) -> Option<&Value> {
        self.definition(tool_id)?.provider_schemas.get(&provider)
    }

    /// Declarations of every tool usable in `mode`, ready to send to `provider`.
    pub fn provider_schemas(&self, provider: Provider, mode: Mode) -> Vec<&Value> {
        self.visible(mode)
            .filter_map(|def| def.provider_schemas.get(&provider))
            .collect()
    }

    /// One line per tool usable in `mode`, for the system prompt.
    pub fn summaries(&self, mode: Mode) -> String {
        self.visible(mode)
            .map(|def| format!("- {}: {}", def.tool_id, def.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn metadata(&self, tool_id: &str) -> Option<ToolMetadata> {
        self.definition(tool_id).map(ToolMetadata::from)
    }

    /// Arguments as the handler would see them: declared defaults applied.
    /// Loop, idempotency and confirmation keys hash this form.
    pub fn normalized_arguments(&self, tool_id: &str, args: &Value) -> Value {
        match self.tools.get(tool_id) {
            Some(tool) => tool.validator.with_defaults(args),
            None => args.clone(),
        }
    }

    fn visible(&self, mode: Mode) -> impl Iterator<Item = &ToolDefinition> {
        self.order
            .iter()
            .filter_map(|id| self.tools.get(id))
            .map(|t| &t.definition)
            .filter(move |def| def.allows_mode(mode))
    }

    fn meta(&self, tool_id: &str, tool_version: &str, duration_ms: u64) -> ResponseMeta {
        ResponseMeta {
            tool_id: tool_id.to_string(),
            tool_version: tool_version.to_string(),
            registry_version: self.version.clone(),
            duration_ms,
            cache_hit: false,
        }
    }

    /// Meta for a response produced without running the handler.
    pub fn rejection_meta(&self, tool_id: &str) -> ResponseMeta {
        let version = self
            .definition(tool_id)
            .map(|d| d.version.as_str())
            .unwrap_or_default();
        self.meta(tool_id, version, 0)
    }

    /// Validate, run the handler, and wrap its outcome in the envelope.
    ///
    /// Handler errors and panics become `INTERNAL`. Exceeding the latency
    /// budget only logs a warning.
    pub async fn execute(&self, tool_id: &str, args: Value, ctx: &ExecutionContext) -> ToolResponse {
        let started = Instant::now();
        let Some(tool) = self.tools.get(tool_id) else {
            return ToolResponse::rejected(
                ToolError::new(ErrorType::NotFound, format!("unknown tool '{tool_id}'")),
                self.meta(tool_id, "", 0),
            );
        };
        let def = &tool.definition;

        let args = match tool.validator.validate(tool_id, args) {
            Ok(args) => args,
            Err(errors) => {
                debug!(tool_id, errors = ?errors, "argument validation failed");
                return ToolResponse::rejected(
                    ToolError::validation(format!("invalid arguments for '{tool_id}'"))
                        .with_details(json!({ "errors": errors })),
                    self.meta(tool_id, &def.version, elapsed_ms(started)),
                );
            }
        };

        let outcome = match AssertUnwindSafe(tool.handler.call(args, ctx))
            .catch_unwind()
            .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(tool_id, error = %e, "handler failed");
                ToolOutcome::fail(ToolError::internal(format!("{e:#}")))
            }
            Err(_) => {
                error!(tool_id, "handler panicked");
                ToolOutcome::fail(ToolError::internal("handler panicked"))
            }
        };

        let duration_ms = elapsed_ms(started);
        if duration_ms > def.latency_budget_ms {
            warn!(
                tool_id,
                duration_ms,
                budget_ms = def.latency_budget_ms,
                "tool exceeded its latency budget"
            );
        }
        ToolResponse::from_outcome(outcome, self.meta(tool_id, &def.version, duration_ms))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Process-wide registry. Holds the current snapshot; `lock()` freezes it.
pub struct RuntimeRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    handlers: HandlerTable,
    locked: AtomicBool,
    production: bool,
}

impl RuntimeRegistry {
    pub fn new(
        artifact: RegistryArtifact,
        handlers: HandlerTable,
        production: bool,
    ) -> Result<Self, RegistryError> {
        let snapshot = RegistrySnapshot::bind(artifact, &handlers)?;
        info!(
            version = %snapshot.version(),
            tools = snapshot.len(),
            production,
            "loaded tool registry"
        );
        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            handlers,
            locked: AtomicBool::new(false),
            production,
        })
    }

    pub fn from_path(
        path: &Path,
        handlers: HandlerTable,
        production: bool,
    ) -> Result<Self, RegistryError> {
        Self::new(RegistryArtifact::load(path)?, handlers, production)
    }

    /// Freeze the registry. Idempotent.
    pub fn lock(&self) {
        if !self.locked.swap(true, Ordering::SeqCst) {
            info!(version = %self.snapshot().version(), "tool registry locked");
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new artifact. After `lock()` this is only allowed outside
    /// production. Sessions already running keep their old snapshot.
    pub fn reload(&self, artifact: RegistryArtifact) -> Result<(), RegistryError> {
        if self.is_locked() {
            if self.production {
                error!("attempted registry reload after lock in production");
                return Err(RegistryError::ReloadAfterLock);
            }
            warn!("reloading a locked registry (development only)");
        }
        let snapshot = Arc::new(RegistrySnapshot::bind(artifact, &self.handlers)?);
        info!(version = %snapshot.version(), tools = snapshot.len(), "reloaded tool registry");
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = snapshot;
        Ok(())
    }

    pub fn version(&self) -> String {
        self.snapshot().version().to_string()
    }

    pub fn provider_schema(&self, tool_id: &str, provider: Provider) -> Option<Value> {
        self.snapshot().provider_schema(tool_id, provider).cloned()
    }

    pub fn summaries(&self, mode: Mode) -> String {
        self.snapshot().summaries(mode)
    }

    pub fn metadata(&self, tool_id: &str) -> Option<ToolMetadata> {
        self.snapshot().metadata(tool_id)
    }

    pub async fn execute(&self, tool_id: &str, args: Value, ctx: &ExecutionContext) -> ToolResponse {
        let snapshot = self.snapshot();
        snapshot.execute(tool_id, args, ctx).await
    }
}
