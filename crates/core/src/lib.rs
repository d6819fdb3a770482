pub mod canonical;
pub mod config;
pub mod error;
pub mod intent;
pub mod response;
pub mod tool;

pub use config::Config;
pub use error::*;
pub use intent::{EndTrigger, Intent};
pub use response::{ConfirmationRequest, ErrorType, ResponseMeta, ToolError, ToolOutcome, ToolResponse};
pub use tool::{Mode, Provider, RegistryArtifact, SideEffects, ToolCategory, ToolDefinition};
