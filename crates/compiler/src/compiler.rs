use std::collections::HashMap;
use std::path::Path;

use chrono::Utc;
use palaver_core::canonical::{canonical_string, sha256_hex};
use palaver_core::tool::ARTIFACT_FORMAT_VERSION;
use palaver_core::{RegistryArtifact, ToolDefinition};
use tracing::{debug, info};

use crate::error::{BuildError, ValidationIssue};
use crate::source;
use crate::validate;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// VCS revision of the tool sources, folded into the version when present.
    pub source_revision: Option<String>,
}

/// Validate every tool under `dir` without emitting anything.
/// Returns the number of valid tools.
pub fn check_dir(dir: &Path) -> Result<usize, BuildError> {
    collect_definitions(dir).map(|defs| defs.len())
}

/// Compile every tool under `dir` into one artifact. Any issue aborts the build.
pub fn compile_dir(dir: &Path, options: &BuildOptions) -> Result<RegistryArtifact, BuildError> {
    let tools = collect_definitions(dir)?;
    let version = compute_version(&tools, options.source_revision.as_deref());

    info!(
        tools = tools.len(),
        version = %version,
        source_revision = options.source_revision.as_deref().unwrap_or("(none)"),
        "compiled tool registry"
    );

    Ok(RegistryArtifact {
        format_version: ARTIFACT_FORMAT_VERSION,
        version,
        source_revision: options.source_revision.clone(),
        build_timestamp: Utc::now(),
        tools,
    })
}

fn collect_definitions(dir: &Path) -> Result<Vec<ToolDefinition>, BuildError> {
    let dirs = source::discover(dir)?;
    if dirs.is_empty() {
        return Err(BuildError::NoTools(dir.to_path_buf()));
    }

    let mut issues: Vec<ValidationIssue> = Vec::new();
    let mut tools: Vec<ToolDefinition> = Vec::new();
    let mut seen: HashMap<String, String> = HashMap::new();

    for tool_dir in dirs {
        let loaded = match source::load(&tool_dir) {
            Ok(src) => src,
            Err(mut errs) => {
                issues.append(&mut errs);
                continue;
            }
        };
        match validate::validate_tool(&loaded) {
            Ok(def) => {
                if let Some(first) = seen.insert(def.tool_id.clone(), loaded.dir_name.clone()) {
                    issues.push(ValidationIssue::new(
                        &loaded.dir_name,
                        format!("tool_id '{}' already defined by '{first}'", def.tool_id),
                    ));
                    continue;
                }
                debug!(tool_id = %def.tool_id, version = %def.version, "validated tool");
                tools.push(def);
            }
            Err(mut errs) => issues.append(&mut errs),
        }
    }

    if !issues.is_empty() {
        return Err(BuildError::Invalid(issues));
    }

    tools.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
    Ok(tools)
}

/// Deterministic content hash over every tool definition (sorted by id, keys
/// canonicalized) plus the source revision. The build timestamp is excluded.
pub fn compute_version(tools: &[ToolDefinition], source_revision: Option<&str>) -> String {
    let mut sorted: Vec<&ToolDefinition> = tools.iter().collect();
    sorted.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));

    let mut material = String::new();
    for tool in sorted {
        let value = serde_json::to_value(tool).unwrap_or_default();
        material.push_str(&canonical_string(&value));
        material.push('\n');
    }
    if let Some(rev) = source_revision {
        material.push_str("rev:");
        material.push_str(rev);
    }
    sha256_hex(material.as_bytes())
}

/// Write the artifact as pretty JSON, creating parent directories.
pub fn write_artifact(path: &Path, artifact: &RegistryArtifact) -> Result<(), BuildError> {
    let json = serde_json::to_string_pretty(artifact)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| BuildError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, json).map_err(|source| BuildError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!(path = %path.display(), version = %artifact.version, "wrote registry artifact");
    Ok(())
}
