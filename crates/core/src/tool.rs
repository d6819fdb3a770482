use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

/// Artifact layout version understood by this build.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// What kind of capability a tool offers the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Retrieval,
    Action,
    Utility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffects {
    None,
    ReadOnly,
    Writes,
}

/// Conversation channel. Fixed when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Text,
    Voice,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Text => write!(f, "text"),
            Mode::Voice => write!(f, "voice"),
        }
    }
}

impl FromStr for Mode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Mode::Text),
            "voice" => Ok(Mode::Voice),
            other => Err(CoreError::UnknownMode(other.to_string())),
        }
    }
}

/// Target LLM provider whose function-declaration shape is precomputed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openai_realtime")]
    OpenAiRealtime,
    #[serde(rename = "anthropic")]
    Anthropic,
    #[serde(rename = "gemini")]
    Gemini,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::OpenAi,
        Provider::OpenAiRealtime,
        Provider::Anthropic,
        Provider::Gemini,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::OpenAiRealtime => "openai_realtime",
            Provider::Anthropic => "anthropic",
            Provider::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| CoreError::UnknownProvider(s.to_string()))
    }
}

/// A compiled, immutable tool definition as stored in the registry artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Canonical identifier (e.g. "search_knowledge")
    pub tool_id: String,
    /// Semantic version of the tool definition
    pub version: String,
    pub category: ToolCategory,
    pub side_effects: SideEffects,
    pub idempotent: bool,
    pub requires_confirmation: bool,
    pub allowed_modes: Vec<Mode>,
    /// Soft budget: overruns are logged, never enforced
    pub latency_budget_ms: u64,
    /// Canonical JSON Schema for the arguments
    pub parameters: Value,
    /// Precomputed function declarations keyed by provider
    pub provider_schemas: BTreeMap<Provider, Value>,
    /// Short description used for prompt injection
    pub summary: String,
    /// Full documentation
    pub documentation: String,
    /// Key into the startup handler table
    pub handler: String,
}

impl ToolDefinition {
    pub fn allows_mode(&self, mode: Mode) -> bool {
        self.allowed_modes.contains(&mode)
    }

    pub fn is_retrieval(&self) -> bool {
        self.category == ToolCategory::Retrieval
    }

    /// Retrieval tools must be idempotent and must not declare writes.
    pub fn classification_violation(&self) -> Option<String> {
        if self.category != ToolCategory::Retrieval {
            return None;
        }
        if !self.idempotent {
            return Some("retrieval tools must be idempotent".to_string());
        }
        if self.side_effects == SideEffects::Writes {
            return Some("retrieval tools must not declare side_effects: writes".to_string());
        }
        None
    }
}

/// The single versioned, content-addressed bundle consumed at process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryArtifact {
    pub format_version: u32,
    /// Hash over every tool's canonical schema and summary (plus source revision)
    pub version: String,
    pub source_revision: Option<String>,
    pub build_timestamp: DateTime<Utc>,
    pub tools: Vec<ToolDefinition>,
}

impl RegistryArtifact {
    pub fn tool(&self, tool_id: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.tool_id == tool_id)
    }

    /// Read an artifact file written by the build compiler.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let artifact: RegistryArtifact =
            serde_json::from_str(&raw).map_err(|source| CoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if artifact.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(CoreError::UnsupportedFormat(artifact.format_version));
        }
        tracing::debug!(
            path = %path.display(),
            version = %artifact.version,
            tools = artifact.tools.len(),
            "loaded registry artifact"
        );
        Ok(artifact)
    }
}
