//! Loading authored tool directories from disk.
//!
//! Layout per tool: `<kebab-name>/tool.yaml`, `schema.json`, `summary.md`, `docs.md`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BuildError, ValidationIssue};

pub const MANIFEST_FILE: &str = "tool.yaml";
pub const SCHEMA_FILE: &str = "schema.json";
pub const SUMMARY_FILE: &str = "summary.md";
pub const DOCS_FILE: &str = "docs.md";

/// Raw `tool.yaml` contents. Every field is optional here so that missing
/// or mistyped metadata is reported as a validation issue, not a parse error.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolManifest {
    pub tool_id: Option<String>,
    pub version: Option<String>,
    pub category: Option<String>,
    pub side_effects: Option<String>,
    pub idempotent: Option<bool>,
    pub requires_confirmation: Option<bool>,
    pub allowed_modes: Option<Vec<String>>,
    pub latency_budget_ms: Option<u64>,
    pub handler: Option<String>,
}

/// One tool directory with all of its artifacts read into memory.
#[derive(Debug, Clone)]
pub struct ToolSource {
    pub dir: PathBuf,
    pub dir_name: String,
    pub manifest: ToolManifest,
    pub schema: Value,
    pub summary: String,
    pub docs: String,
}

impl ToolSource {
    /// Canonical identifier derived from the directory name.
    pub fn canonical_id(&self) -> String {
        canonical_id(&self.dir_name)
    }
}

/// `search-knowledge` becomes `search_knowledge`.
pub fn canonical_id(dir_name: &str) -> String {
    dir_name.trim().to_ascii_lowercase().replace('-', "_")
}

/// Find every directory under `root` that holds a `tool.yaml`, sorted by path.
pub fn discover(root: &Path) -> Result<Vec<PathBuf>, BuildError> {
    if !root.is_dir() {
        return Err(BuildError::MissingToolsDir(root.to_path_buf()));
    }

    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).follow_links(true).min_depth(1) {
        let entry = entry?;
        if entry.file_type().is_file() && entry.file_name() == MANIFEST_FILE {
            if let Some(parent) = entry.path().parent() {
                dirs.push(parent.to_path_buf());
            }
        }
    }
    dirs.sort();
    debug!(root = %root.display(), count = dirs.len(), "discovered tool directories");
    Ok(dirs)
}

/// Read one tool directory. Every unreadable or unparseable file becomes an issue.
pub fn load(dir: &Path) -> Result<ToolSource, Vec<ValidationIssue>> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut issues = Vec::new();

    let manifest = read_file(dir, MANIFEST_FILE, &dir_name, &mut issues)
        .and_then(|raw| match serde_yaml::from_str::<ToolManifest>(&raw) {
            Ok(m) => Some(m),
            Err(e) => {
                issues.push(ValidationIssue::new(&dir_name, format!("{MANIFEST_FILE}: {e}")));
                None
            }
        });

    let schema = read_file(dir, SCHEMA_FILE, &dir_name, &mut issues).and_then(|raw| {
        match serde_json::from_str::<Value>(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                issues.push(ValidationIssue::new(&dir_name, format!("{SCHEMA_FILE}: {e}")));
                None
            }
        }
    });

    let summary = read_file(dir, SUMMARY_FILE, &dir_name, &mut issues);
    let docs = read_file(dir, DOCS_FILE, &dir_name, &mut issues);

    match (manifest, schema, summary, docs) {
        (Some(manifest), Some(schema), Some(summary), Some(docs)) if issues.is_empty() => {
            Ok(ToolSource {
                dir: dir.to_path_buf(),
                dir_name,
                manifest,
                schema,
                summary: summary.trim().to_string(),
                docs,
            })
        }
        _ => Err(issues),
    }
}

fn read_file(
    dir: &Path,
    name: &str,
    tool: &str,
    issues: &mut Vec<ValidationIssue>,
) -> Option<String> {
    let path = dir.join(name);
    match std::fs::read_to_string(&path) {
        Ok(content) => Some(content),
        Err(e) => {
            issues.push(ValidationIssue::new(tool, format!("cannot read {name}: {e}")));
            None
        }
    }
}
