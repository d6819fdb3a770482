//! Schema and documentation validation, run on every tool before anything is emitted.

use std::collections::{BTreeMap, HashSet};

use jsonschema::{Draft, JSONSchema};
use palaver_core::{Mode, SideEffects, ToolCategory, ToolDefinition};
use serde_json::Value;

use crate::adapters::{self, SUPPORTED_KEYWORDS};
use crate::error::ValidationIssue;
use crate::source::ToolSource;

/// Level-2 headings every `docs.md` must contain.
pub const REQUIRED_DOC_SECTIONS: &[&str] = &["Purpose", "Parameters", "Returns", "Errors"];

pub const MAX_SUMMARY_CHARS: usize = 280;

const SCHEMA_TYPES: &[&str] = &["object", "array", "string", "integer", "number", "boolean"];
const SCHEMA_FORMATS: &[&str] = &["email", "date-time", "date", "uri", "uuid"];

/// Validate one loaded source and, if clean, turn it into a [`ToolDefinition`]
/// with every provider schema precomputed.
pub fn validate_tool(source: &ToolSource) -> Result<ToolDefinition, Vec<ValidationIssue>> {
    let mut issues = Vec::new();
    let tool = source.dir_name.as_str();
    let mut issue = |message: String| issues.push(ValidationIssue::new(tool, message));

    let m = &source.manifest;
    let canonical = source.canonical_id();

    let tool_id = required(&m.tool_id, "tool_id", &mut issue);
    if let Some(id) = &tool_id {
        if *id != canonical {
            issue(format!(
                "tool_id '{id}' does not match directory-derived id '{canonical}'"
            ));
        }
    }

    let version = required(&m.version, "version", &mut issue);
    if let Some(v) = &version {
        if !is_semver(v) {
            issue(format!("version '{v}' is not MAJOR.MINOR.PATCH"));
        }
    }

    let category = required(&m.category, "category", &mut issue).and_then(|c| {
        parse_enum::<ToolCategory>(&c, "category", &["retrieval", "action", "utility"], &mut issue)
    });
    let side_effects = required(&m.side_effects, "side_effects", &mut issue).and_then(|s| {
        parse_enum::<SideEffects>(&s, "side_effects", &["none", "read_only", "writes"], &mut issue)
    });
    let idempotent = required(&m.idempotent, "idempotent", &mut issue);
    let latency_budget_ms = required(&m.latency_budget_ms, "latency_budget_ms", &mut issue);
    if latency_budget_ms == Some(0) {
        issue("latency_budget_ms must be greater than zero".to_string());
    }
    let handler = required(&m.handler, "handler", &mut issue);
    if handler.as_deref().is_some_and(|h| h.trim().is_empty()) {
        issue("handler must not be empty".to_string());
    }

    let allowed_modes = required(&m.allowed_modes, "allowed_modes", &mut issue).map(|modes| {
        let mut parsed = Vec::new();
        for raw in modes {
            match raw.parse::<Mode>() {
                Ok(mode) if parsed.contains(&mode) => {
                    issue(format!("allowed_modes lists '{raw}' twice"))
                }
                Ok(mode) => parsed.push(mode),
                Err(_) => issue(format!(
                    "allowed_modes entry '{raw}' is not one of: text, voice"
                )),
            }
        }
        if parsed.is_empty() {
            issue("allowed_modes must name at least one mode".to_string());
        }
        parsed
    });

    for problem in schema_issues(&source.schema) {
        issue(format!("schema: {problem}"));
    }
    for problem in documentation_issues(&source.summary, &source.docs) {
        issue(problem);
    }

    let (
        Some(tool_id),
        Some(version),
        Some(category),
        Some(side_effects),
        Some(idempotent),
        Some(allowed_modes),
        Some(latency_budget_ms),
        Some(handler),
    ) = (
        tool_id,
        version,
        category,
        side_effects,
        idempotent,
        allowed_modes,
        latency_budget_ms,
        handler,
    )
    else {
        return Err(issues);
    };

    let mut definition = ToolDefinition {
        tool_id,
        version,
        category,
        side_effects,
        idempotent,
        requires_confirmation: m.requires_confirmation.unwrap_or(false),
        allowed_modes,
        latency_budget_ms,
        parameters: source.schema.clone(),
        provider_schemas: BTreeMap::new(),
        summary: source.summary.clone(),
        documentation: source.docs.clone(),
        handler: handler.trim().to_string(),
    };

    if let Some(violation) = definition.classification_violation() {
        issue(violation);
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    definition.provider_schemas = palaver_core::Provider::ALL
        .into_iter()
        .map(|p| {
            (
                p,
                adapters::adapt(p, &definition.tool_id, &definition.summary, &definition.parameters),
            )
        })
        .collect();

    Ok(definition)
}

fn required<T: Clone>(
    field: &Option<T>,
    name: &str,
    issue: &mut impl FnMut(String),
) -> Option<T> {
    if field.is_none() {
        issue(format!("missing required field '{name}'"));
    }
    field.clone()
}

fn parse_enum<T: serde::de::DeserializeOwned>(
    raw: &str,
    field: &str,
    allowed: &[&str],
    issue: &mut impl FnMut(String),
) -> Option<T> {
    match serde_json::from_value(Value::String(raw.to_string())) {
        Ok(v) => Some(v),
        Err(_) => {
            issue(format!(
                "{field} '{raw}' is not one of: {}",
                allowed.join(", ")
            ));
            None
        }
    }
}

fn is_semver(v: &str) -> bool {
    let parts: Vec<&str> = v.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Structural problems in a canonical parameter schema.
pub fn schema_issues(schema: &Value) -> Vec<String> {
    let mut problems = Vec::new();
    if schema.get("type").and_then(Value::as_str) != Some("object") {
        problems.push("root must be of type 'object'".to_string());
    }
    check_node(schema, "$", &mut problems);

    if problems.is_empty() {
        if let Err(e) = JSONSchema::options().with_draft(Draft::Draft7).compile(schema) {
            problems.push(format!("does not compile: {e}"));
        }
    }
    problems
}

fn check_node(node: &Value, path: &str, problems: &mut Vec<String>) {
    let Some(obj) = node.as_object() else {
        problems.push(format!("{path} must be a schema object"));
        return;
    };

    for key in obj.keys() {
        if !SUPPORTED_KEYWORDS.contains(&key.as_str()) {
            problems.push(format!("{path} uses unsupported keyword '{key}'"));
        }
    }

    let ty = match obj.get("type") {
        Some(Value::String(t)) if SCHEMA_TYPES.contains(&t.as_str()) => t.as_str(),
        Some(Value::String(t)) => {
            problems.push(format!("{path} has unknown type '{t}'"));
            return;
        }
        Some(_) => {
            problems.push(format!("{path} 'type' must be a single type name"));
            return;
        }
        None => {
            problems.push(format!("{path} is missing 'type'"));
            return;
        }
    };

    if let Some(values) = obj.get("enum") {
        match values.as_array() {
            Some(arr) if !arr.is_empty() => {}
            _ => problems.push(format!("{path} 'enum' must be a non-empty array")),
        }
    }

    if let Some(format) = obj.get("format") {
        match format.as_str() {
            Some(f) if SCHEMA_FORMATS.contains(&f) => {}
            _ => problems.push(format!(
                "{path} 'format' must be one of: {}",
                SCHEMA_FORMATS.join(", ")
            )),
        }
    }

    match ty {
        "object" => {
            if obj.get("additionalProperties") != Some(&Value::Bool(false)) {
                problems.push(format!("{path} must set additionalProperties: false"));
            }
            let props = match obj.get("properties") {
                None => None,
                Some(Value::Object(props)) => Some(props),
                Some(_) => {
                    problems.push(format!("{path} 'properties' must be an object"));
                    None
                }
            };
            if let Some(props) = props {
                for (name, child) in props {
                    check_node(child, &format!("{path}.{name}"), problems);
                }
            }
            if let Some(required) = obj.get("required") {
                let Some(names) = required.as_array() else {
                    problems.push(format!("{path} 'required' must be an array"));
                    return;
                };
                let mut seen = HashSet::new();
                for name in names {
                    match name.as_str() {
                        Some(n) if props.is_some_and(|p| p.contains_key(n)) => {
                            if !seen.insert(n) {
                                problems.push(format!("{path} requires '{n}' twice"));
                            }
                        }
                        Some(n) => problems.push(format!(
                            "{path} requires '{n}' which is not in properties"
                        )),
                        None => problems.push(format!("{path} 'required' entries must be strings")),
                    }
                }
            }
        }
        "array" => match obj.get("items") {
            Some(items) => check_node(items, &format!("{path}[]"), problems),
            None => problems.push(format!("{path} arrays must declare 'items'")),
        },
        _ => {
            if obj.contains_key("properties") || obj.contains_key("items") {
                problems.push(format!("{path} of type '{ty}' cannot declare properties or items"));
            }
        }
    }
}

/// Missing or malformed documentation.
pub fn documentation_issues(summary: &str, docs: &str) -> Vec<String> {
    let mut problems = Vec::new();
    let summary = summary.trim();
    if summary.is_empty() {
        problems.push("summary.md is empty".to_string());
    } else if summary.chars().count() > MAX_SUMMARY_CHARS {
        problems.push(format!(
            "summary.md exceeds {MAX_SUMMARY_CHARS} characters"
        ));
    }

    let headings: Vec<String> = docs
        .lines()
        .filter_map(|line| line.trim().strip_prefix("## "))
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();
    for section in REQUIRED_DOC_SECTIONS {
        if !headings.iter().any(|h| h == &section.to_ascii_lowercase()) {
            problems.push(format!("docs.md is missing section '## {section}'"));
        }
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ToolManifest;
    use serde_json::json;
    use std::path::PathBuf;

    const DOCS: &str = "# Tool\n\n## Purpose\nx\n## Parameters\nx\n## Returns\nx\n## Errors\nx\n";

    fn source() -> ToolSource {
        ToolSource {
            dir: PathBuf::from("tools/search-knowledge"),
            dir_name: "search-knowledge".to_string(),
            manifest: ToolManifest {
                tool_id: Some("search_knowledge".to_string()),
                version: Some("1.2.0".to_string()),
                category: Some("retrieval".to_string()),
                side_effects: Some("read_only".to_string()),
                idempotent: Some(true),
                requires_confirmation: None,
                allowed_modes: Some(vec!["text".to_string(), "voice".to_string()]),
                latency_budget_ms: Some(800),
                handler: Some("knowledge.search".to_string()),
            },
            schema: json!({
                "type": "object",
                "additionalProperties": false,
                "required": ["query"],
                "properties": {"query": {"type": "string", "minLength": 1}}
            }),
            summary: "Search the knowledge base.".to_string(),
            docs: DOCS.to_string(),
        }
    }

    fn messages(result: Result<ToolDefinition, Vec<ValidationIssue>>) -> Vec<String> {
        result.unwrap_err().into_iter().map(|i| i.message).collect()
    }

    #[test]
    fn valid_tool_compiles_with_all_provider_schemas() {
        let def = validate_tool(&source()).unwrap();
        assert_eq!(def.tool_id, "search_knowledge");
        assert_eq!(def.category, ToolCategory::Retrieval);
        assert!(!def.requires_confirmation);
        assert_eq!(def.provider_schemas.len(), palaver_core::Provider::ALL.len());
    }

    #[test]
    fn id_must_match_directory() {
        let mut src = source();
        src.manifest.tool_id = Some("knowledge_search".to_string());
        let msgs = messages(validate_tool(&src));
        assert!(msgs.iter().any(|m| m.contains("directory-derived")));
    }

    #[test]
    fn missing_and_bad_enum_fields_are_all_reported() {
        let mut src = source();
        src.manifest.category = Some("lookup".to_string());
        src.manifest.handler = None;
        src.manifest.allowed_modes = Some(vec!["video".to_string()]);
        let msgs = messages(validate_tool(&src));
        assert!(msgs.iter().any(|m| m.contains("category 'lookup'")));
        assert!(msgs.iter().any(|m| m.contains("'handler'")));
        assert!(msgs.iter().any(|m| m.contains("'video'")));
    }

    #[test]
    fn retrieval_writes_is_rejected() {
        let mut src = source();
        src.manifest.side_effects = Some("writes".to_string());
        let msgs = messages(validate_tool(&src));
        assert!(msgs.iter().any(|m| m.contains("must not declare")));
    }

    #[test]
    fn nested_object_needs_closed_properties() {
        let problems = schema_issues(&json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "filters": {"type": "object", "properties": {"tag": {"type": "string"}}}
            }
        }));
        assert_eq!(problems, vec!["$.filters must set additionalProperties: false"]);
    }

    #[test]
    fn malformed_constructs_are_rejected() {
        let problems = schema_issues(&json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["missing"],
            "properties": {
                "tags": {"type": "array"},
                "kind": {"type": "string", "enum": []},
                "when": {"type": "string", "format": "sometime"},
                "n": {"type": "integr"},
                "x": {"type": "string", "title": "X"}
            }
        }));
        assert!(problems.iter().any(|p| p.contains("'missing' which is not in properties")));
        assert!(problems.iter().any(|p| p.contains("$.tags arrays must declare 'items'")));
        assert!(problems.iter().any(|p| p.contains("$.kind 'enum'")));
        assert!(problems.iter().any(|p| p.contains("$.when 'format'")));
        assert!(problems.iter().any(|p| p.contains("unknown type 'integr'")));
        assert!(problems.iter().any(|p| p.contains("unsupported keyword 'title'")));
    }

    #[test]
    fn non_object_root_is_rejected() {
        let problems = schema_issues(&json!({"type": "string"}));
        assert!(problems.iter().any(|p| p.contains("root")));
    }

    #[test]
    fn docs_need_every_section() {
        let problems = documentation_issues("ok", "## Purpose\n## Returns\n");
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("Parameters"));
        assert!(problems[1].contains("Errors"));
    }

    #[test]
    fn overlong_summary() {
        let long = "x".repeat(MAX_SUMMARY_CHARS + 1);
        let problems = documentation_issues(&long, DOCS);
        assert_eq!(problems.len(), 1);
    }

    #[test]
    fn version_shape() {
        assert!(is_semver("0.1.10"));
        assert!(!is_semver("1.0"));
        assert!(!is_semver("1.0.0-beta"));
    }
}
