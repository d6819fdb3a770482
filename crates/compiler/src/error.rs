use std::fmt;
use std::path::PathBuf;

/// A single problem found while validating one tool definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Tool directory name (or canonical id once known)
    pub tool: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.tool, self.message)
    }
}

/// Errors that abort a build. There is no partial output.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Tools directory not found: {0}")]
    MissingToolsDir(PathBuf),

    #[error("No tool definitions found under {0}")]
    NoTools(PathBuf),

    #[error("Failed to scan tools directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("{} validation issue(s), first: {}", .0.len(), .0.first().map(ToString::to_string).unwrap_or_default())]
    Invalid(Vec<ValidationIssue>),

    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl BuildError {
    /// Every validation issue carried by this error (empty for IO-style failures).
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            BuildError::Invalid(issues) => issues,
            _ => &[],
        }
    }
}
