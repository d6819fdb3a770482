use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse registry artifact {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Unsupported artifact format version {0}")]
    UnsupportedFormat(u32),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Unknown mode: {0}")]
    UnknownMode(String),
}
