use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Build and inspect the tool registry.
#[derive(Parser, Debug)]
#[command(name = "palaver", about = "Tool registry compiler and inspector")]
pub struct CliArgs {
    /// Log at debug level (RUST_LOG still wins when set)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Validate tool definitions without writing anything
    Check {
        /// Directory of tool definitions (default: TOOLS_DIR or ./tools)
        #[arg(long)]
        tools_dir: Option<PathBuf>,
    },

    /// Compile tool definitions into a registry artifact
    Build {
        #[arg(long)]
        tools_dir: Option<PathBuf>,

        /// Output path (default: REGISTRY_ARTIFACT)
        #[arg(long)]
        out: Option<PathBuf>,

        /// VCS revision folded into the registry version (default: SOURCE_REVISION)
        #[arg(long)]
        source_revision: Option<String>,
    },

    /// Load an artifact into a locked registry and print what the model would see
    Inspect {
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Print provider function declarations instead of summaries
        /// (openai, openai_realtime, anthropic, gemini)
        #[arg(long)]
        provider: Option<String>,

        /// Interaction mode to filter by: text or voice
        #[arg(long, default_value = "text")]
        mode: String,
    },
}
