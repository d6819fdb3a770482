mod cli;
mod terminal;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use palaver_compiler::{check_dir, compile_dir, write_artifact, BuildError, BuildOptions};
use palaver_core::config::load_dotenv;
use palaver_core::{Config, Mode, Provider};
use palaver_tool_runtime::tools::{HttpKnowledgeIndex, InMemoryKnowledgeIndex, KnowledgeIndex};
use palaver_tool_runtime::{builtin_handlers, RuntimeRegistry};
use tracing::{info, warn};

use crate::cli::{CliArgs, Command};
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    load_dotenv();
    let config = Config::from_env();
    config.log_summary();

    let terminal = Terminal::new();
    let result = match args.command {
        Command::Check { tools_dir } => {
            let dir = tools_dir.unwrap_or_else(|| config.build.tools_dir.clone());
            check(&terminal, &dir)
        }
        Command::Build {
            tools_dir,
            out,
            source_revision,
        } => {
            let dir = tools_dir.unwrap_or_else(|| config.build.tools_dir.clone());
            let out = out.unwrap_or_else(|| config.build.artifact_path.clone());
            let options = BuildOptions {
                source_revision: source_revision.or_else(|| config.build.source_revision.clone()),
            };
            build(&terminal, &dir, &out, &options)
        }
        Command::Inspect {
            artifact,
            provider,
            mode,
        } => {
            let path = artifact.unwrap_or_else(|| config.build.artifact_path.clone());
            inspect(&terminal, &config, &path, provider.as_deref(), &mode)
        }
    };

    if let Err(e) = result {
        terminal.print_error(&format!("{e:#}"))?;
        std::process::exit(1);
    }
    Ok(())
}

fn check(terminal: &Terminal, dir: &Path) -> Result<()> {
    match check_dir(dir) {
        Ok(count) => terminal.print_ok(&format!("{count} tool definition(s) valid in {}", dir.display())),
        Err(e) => report_build_error(terminal, e),
    }
}

fn build(terminal: &Terminal, dir: &Path, out: &Path, options: &BuildOptions) -> Result<()> {
    let artifact = match compile_dir(dir, options) {
        Ok(artifact) => artifact,
        Err(e) => return report_build_error(terminal, e),
    };
    write_artifact(out, &artifact)
        .with_context(|| format!("failed to write artifact to {}", out.display()))?;
    info!(path = %out.display(), "artifact written");
    terminal.print_ok(&format!(
        "Built registry {} ({} tools) -> {}",
        artifact.version,
        artifact.tools.len(),
        out.display()
    ))
}

fn report_build_error(terminal: &Terminal, e: BuildError) -> Result<()> {
    if !e.issues().is_empty() {
        terminal.print_header(&format!("{} validation issue(s):", e.issues().len()))?;
        terminal.print_issues(e.issues())?;
    }
    Err(e).context("tool definitions are invalid")
}

fn inspect(
    terminal: &Terminal,
    config: &Config,
    path: &Path,
    provider: Option<&str>,
    mode: &str,
) -> Result<()> {
    let mode: Mode = mode.parse().context("invalid --mode")?;
    let index: Arc<dyn KnowledgeIndex> = match HttpKnowledgeIndex::from_config(&config.knowledge)? {
        Some(http) => Arc::new(http),
        None => {
            warn!("no knowledge search URL configured; using an empty in-memory index");
            Arc::new(InMemoryKnowledgeIndex::default())
        }
    };
    let handlers = builtin_handlers(index)?;
    let registry = RuntimeRegistry::from_path(path, handlers, config.production)
        .with_context(|| format!("failed to load registry from {}", path.display()))?;
    registry.lock();

    let snapshot = registry.snapshot();
    terminal.print_header(&format!(
        "Registry {} ({} tools, revision {})",
        snapshot.version(),
        snapshot.len(),
        snapshot.source_revision().unwrap_or("none")
    ))?;

    match provider {
        Some(name) => {
            let provider: Provider = name.parse()?;
            let schemas = snapshot.provider_schemas(provider, mode);
            terminal.print_info(&format!("{} declaration(s) for {provider} in {mode} mode", schemas.len()))?;
            terminal.print_plain(&serde_json::to_string_pretty(&schemas)?)
        }
        None => {
            terminal.print_info(&format!("Tools available in {mode} mode:"))?;
            terminal.print_plain(&snapshot.summaries(mode))
        }
    }
}
