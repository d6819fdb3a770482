use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::tool::Mode;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Resolves `{PROFILE}_{KEY}` first, falling back to `{KEY}`.
struct Profiled<'a> {
    profile: &'a str,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Profiled<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            if let Some(v) = (self.lookup)(&format!("{}_{}", self.profile, key)) {
                return Some(v);
            }
        }
        (self.lookup)(key)
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn u32(&self, key: &str, default: u32) -> u32 {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn u64(&self, key: &str, default: u64) -> u64 {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn usize(&self, key: &str, default: usize) -> usize {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    /// `PALAVER_ENV=production` forbids registry reloads after lock.
    pub production: bool,
    pub build: BuildConfig,
    pub orchestrator: OrchestratorConfig,
    pub knowledge: KnowledgeConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PALAVER_PROFILE`.
    pub fn from_env() -> Self {
        let profile = env_opt("PALAVER_PROFILE").unwrap_or_default().to_uppercase();
        Self::from_lookup(&profile, &env_opt)
    }

    pub fn from_lookup(profile: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let p = Profiled { profile, lookup };
        Self {
            profile: profile.to_string(),
            production: p.or("PALAVER_ENV", "development").eq_ignore_ascii_case("production"),
            build: BuildConfig::from_profiled(&p),
            orchestrator: OrchestratorConfig::from_profiled(&p),
            knowledge: KnowledgeConfig::from_profiled(&p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let o = &self.orchestrator;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  env:          {}", if self.production { "production" } else { "development" });
        tracing::info!("  build:        tools_dir={}, artifact={}", self.build.tools_dir.display(), self.build.artifact_path.display());
        tracing::info!("  text budget:  retrieval={}, total={}", o.text.max_retrieval_calls, o.text.max_total_calls);
        tracing::info!("  voice budget: retrieval={}, total={}", o.voice.max_retrieval_calls, o.voice.max_total_calls);
        tracing::info!("  idempotency:  cache_size={}", o.idempotency_cache_size);
        tracing::info!("  confirmation: ttl={}s", o.confirmation_ttl_secs);
        tracing::info!("  knowledge:    configured={}", self.knowledge.is_configured());
    }
}

// ── Build ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    pub tools_dir: PathBuf,
    pub artifact_path: PathBuf,
    pub source_revision: Option<String>,
}

impl BuildConfig {
    fn from_profiled(p: &Profiled<'_>) -> Self {
        Self {
            tools_dir: PathBuf::from(p.or("TOOLS_DIR", "tools")),
            artifact_path: PathBuf::from(p.or("REGISTRY_ARTIFACT", "target/registry.json")),
            source_revision: p.opt("SOURCE_REVISION"),
        }
    }
}

// ── Orchestrator ──────────────────────────────────────────────

/// Hard per-turn limits for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnBudget {
    pub max_retrieval_calls: u32,
    pub max_total_calls: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub text: TurnBudget,
    pub voice: TurnBudget,
    pub idempotency_cache_size: usize,
    pub confirmation_ttl_secs: u64,
    /// Delay before the single retry of an idempotent tool in text mode
    pub retry_backoff_ms: u64,
}

impl OrchestratorConfig {
    fn from_profiled(p: &Profiled<'_>) -> Self {
        Self {
            text: TurnBudget {
                max_retrieval_calls: p.u32("TEXT_MAX_RETRIEVAL_CALLS", 4),
                max_total_calls: p.u32("TEXT_MAX_TOTAL_CALLS", 5),
            },
            voice: TurnBudget {
                max_retrieval_calls: p.u32("VOICE_MAX_RETRIEVAL_CALLS", 2),
                max_total_calls: p.u32("VOICE_MAX_TOTAL_CALLS", 3),
            },
            idempotency_cache_size: p.usize("IDEMPOTENCY_CACHE_SIZE", 64),
            confirmation_ttl_secs: p.u64("CONFIRMATION_TTL_SECS", 120),
            retry_backoff_ms: p.u64("RETRY_BACKOFF_MS", 250),
        }
    }

    pub fn budget(&self, mode: Mode) -> TurnBudget {
        match mode {
            Mode::Text => self.text,
            Mode::Voice => self.voice,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_profiled(&Profiled {
            profile: "",
            lookup: &|_: &str| None,
        })
    }
}

// ── Knowledge search ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub search_url: Option<String>,
    pub timeout_ms: u64,
}

impl KnowledgeConfig {
    fn from_profiled(p: &Profiled<'_>) -> Self {
        Self {
            search_url: p.opt("KNOWLEDGE_SEARCH_URL"),
            timeout_ms: p.u64("KNOWLEDGE_TIMEOUT_MS", 2_000),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.search_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = Config::from_lookup("", &|_: &str| None);
        assert!(!config.production);
        assert_eq!(config.orchestrator.text.max_total_calls, 5);
        assert_eq!(config.orchestrator.voice.max_retrieval_calls, 2);
        assert_eq!(config.build.tools_dir, PathBuf::from("tools"));
        assert!(!config.knowledge.is_configured());
    }

    #[test]
    fn profile_prefix_wins() {
        let lookup = lookup_from(&[
            ("PALAVER_ENV", "development"),
            ("PROD_PALAVER_ENV", "production"),
            ("VOICE_MAX_TOTAL_CALLS", "7"),
        ]);
        let config = Config::from_lookup("PROD", &lookup);
        assert!(config.production);
        assert_eq!(config.orchestrator.voice.max_total_calls, 7);
        assert_eq!(config.profile_label(), "PROD");
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let lookup = lookup_from(&[("TEXT_MAX_TOTAL_CALLS", "lots")]);
        let config = Config::from_lookup("", &lookup);
        assert_eq!(config.orchestrator.budget(Mode::Text).max_total_calls, 5);
    }
}
