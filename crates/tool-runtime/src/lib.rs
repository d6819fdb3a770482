pub mod context;
pub mod handler;
pub mod orchestrator;
pub mod registry;
pub mod state;
pub mod tools;
pub mod transport;
pub mod validation;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use context::{AuditEvent, AuditSink, Capabilities, ExecutionContext, MessageSink, NullMessageSink, TracingAudit};
pub use handler::{HandlerTable, ToolHandler};
pub use orchestrator::{CallRecord, Orchestrator, Session, StopReason, TurnReport};
pub use registry::{RegistryError, RegistrySnapshot, RuntimeRegistry, ToolMetadata};
pub use state::{Lifecycle, SessionView, StateController};
pub use tools::builtin_handlers;
pub use transport::{ModelMessage, ModelTransport, ProposedCall, TransportError};
pub use validation::ArgumentValidator;
