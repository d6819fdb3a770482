//! Fixtures for building registries in tests without running the compiler.

use std::collections::BTreeMap;

use chrono::Utc;
use palaver_core::canonical::canonical_hash;
use palaver_core::tool::ARTIFACT_FORMAT_VERSION;
use palaver_core::{Mode, Provider, RegistryArtifact, SideEffects, ToolCategory, ToolDefinition};
use serde_json::{json, Value};

pub struct ToolBuilder {
    def: ToolDefinition,
}

/// A utility tool with a single optional string parameter `q`, allowed in
/// both modes. Adjust with the builder methods.
pub fn tool(tool_id: &str) -> ToolBuilder {
    ToolBuilder {
        def: ToolDefinition {
            tool_id: tool_id.to_string(),
            version: "1.0.0".to_string(),
            category: ToolCategory::Utility,
            side_effects: SideEffects::None,
            idempotent: true,
            requires_confirmation: false,
            allowed_modes: vec![Mode::Text, Mode::Voice],
            latency_budget_ms: 1_000,
            parameters: json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {"q": {"type": "string"}}
            }),
            provider_schemas: BTreeMap::new(),
            summary: format!("{tool_id} fixture."),
            documentation: String::new(),
            handler: format!("test.{tool_id}"),
        },
    }
}

impl ToolBuilder {
    pub fn handler(mut self, key: &str) -> Self {
        self.def.handler = key.to_string();
        self
    }

    pub fn modes(mut self, modes: &[Mode]) -> Self {
        self.def.allowed_modes = modes.to_vec();
        self
    }

    pub fn retrieval(mut self) -> Self {
        self.def.category = ToolCategory::Retrieval;
        self.def.side_effects = SideEffects::ReadOnly;
        self
    }

    /// Side-effecting action that needs user confirmation.
    pub fn confirmed_action(mut self) -> Self {
        self.def.category = ToolCategory::Action;
        self.def.side_effects = SideEffects::Writes;
        self.def.idempotent = false;
        self.def.requires_confirmation = true;
        self
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.def.idempotent = idempotent;
        self
    }

    pub fn parameters(mut self, schema: Value) -> Self {
        self.def.parameters = schema;
        self
    }

    pub fn build(mut self) -> ToolDefinition {
        for provider in Provider::ALL {
            self.def.provider_schemas.insert(
                provider,
                json!({"name": self.def.tool_id, "parameters": self.def.parameters}),
            );
        }
        self.def
    }
}

pub fn artifact(tools: Vec<ToolDefinition>) -> RegistryArtifact {
    let version = canonical_hash(&json!(tools));
    RegistryArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        version,
        source_revision: None,
        build_timestamp: Utc::now(),
        tools,
    }
}
