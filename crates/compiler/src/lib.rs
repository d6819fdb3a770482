//! Build-time tool compiler.
//!
//! Scans a directory of authored tool definitions, validates each one
//! (metadata, parameter schema, documentation), precomputes every provider's
//! function-declaration shape and emits one content-addressed
//! [`RegistryArtifact`](palaver_core::RegistryArtifact).

pub mod adapters;
pub mod compiler;
pub mod error;
pub mod source;
pub mod validate;

pub use compiler::{check_dir, compile_dir, compute_version, write_artifact, BuildOptions};
pub use error::{BuildError, ValidationIssue};
