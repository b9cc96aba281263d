//! Configuration for the correlation engine.
//!
//! Loads settings from /etc/crisisd/config.toml or uses defaults. Thresholds
//! are operator-tuned, so the engine never reads them as constants: a
//! [`SettingsSource`] re-reads the file with a short TTL and evaluations pick
//! up changes without a restart.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/crisisd/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/crisisd/config.toml";

/// How long a loaded config stays fresh before the source re-reads the file.
pub const SETTINGS_TTL_SECS: u64 = 30;

/// Correlation and promotion thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Categories that never escalate to an incident
    #[serde(default = "default_excluded_categories")]
    pub excluded_categories: Vec<String>,

    /// No new incident for a team within this window after the last one
    #[serde(default = "default_cooldown_window")]
    pub cooldown_window_secs: u64,

    /// Tight re-check window immediately before incident creation
    #[serde(default = "default_recent_window")]
    pub recent_window_secs: u64,

    /// How far back active incidents are considered for matching
    #[serde(default = "default_team_recency_window")]
    pub team_recency_window_secs: u64,

    /// How far back unlinked tickets are considered for clustering
    #[serde(default = "default_cluster_window")]
    pub cluster_window_secs: u64,

    /// How many other similar tickets justify opening an incident
    #[serde(default = "default_threshold")]
    pub threshold: usize,

    /// Jaccard similarity threshold
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Vocabulary of operational-failure terms for the fast signal pass
    #[serde(default = "default_system_keywords")]
    pub system_keywords: Vec<String>,
}

fn default_excluded_categories() -> Vec<String> {
    vec!["marketing".to_string(), "billing_question".to_string()]
}

fn default_cooldown_window() -> u64 {
    1_800 // 30 minutes
}

fn default_recent_window() -> u64 {
    900 // 15 minutes
}

fn default_team_recency_window() -> u64 {
    86_400 // 24 hours
}

fn default_cluster_window() -> u64 {
    7_200 // 2 hours
}

fn default_threshold() -> usize {
    3
}

fn default_similarity_threshold() -> f64 {
    0.7
}

fn default_system_keywords() -> Vec<String> {
    [
        "down", "unavailable", "outage", "offline", "login", "timeout", "error", "crash",
        "failure", "failed", "slow", "latency", "unreachable", "broken", "degraded",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            excluded_categories: default_excluded_categories(),
            cooldown_window_secs: default_cooldown_window(),
            recent_window_secs: default_recent_window(),
            team_recency_window_secs: default_team_recency_window(),
            cluster_window_secs: default_cluster_window(),
            threshold: default_threshold(),
            similarity_threshold: default_similarity_threshold(),
            system_keywords: default_system_keywords(),
        }
    }
}

/// LLM correlation call configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Ollama-compatible endpoint
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    /// Model used for the correlation decision
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retry budget for transient provider errors (429/503)
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5:7b-instruct".to_string()
}

fn default_llm_timeout() -> u64 {
    4
}

fn default_llm_retries() -> u32 {
    2
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

/// Daemon surface configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8460".to_string()
}

fn default_db_path() -> String {
    "/var/lib/crisisd/crisis.db".to_string()
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub server: ServerSettings,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.as_ref().display());
        Ok(config)
    }
}

/// Hot-reloadable settings handle.
///
/// Every evaluation calls [`SettingsSource::current`], which serves a cached
/// copy and re-reads the file once the TTL expires. A malformed re-read keeps
/// the last good settings rather than failing the evaluation.
pub struct SettingsSource {
    path: PathBuf,
    ttl: Duration,
    cached: RwLock<(Instant, Config)>,
}

impl SettingsSource {
    /// Create a source over `path` with the default TTL, seeded with
    /// whatever currently loads (file contents or defaults).
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self::with_ttl(path, Duration::from_secs(SETTINGS_TTL_SECS))
    }

    pub fn with_ttl<P: Into<PathBuf>>(path: P, ttl: Duration) -> Self {
        let path = path.into();
        let initial = Config::load_from_path(&path).unwrap_or_else(|e| {
            warn!("Config not readable at startup, using defaults: {}", e);
            Config::default()
        });
        Self {
            path,
            ttl,
            cached: RwLock::new((Instant::now(), initial)),
        }
    }

    /// Fixed settings that never touch the filesystem (tests, embedding).
    pub fn fixed(config: Config) -> Self {
        Self {
            path: PathBuf::new(),
            ttl: Duration::MAX,
            cached: RwLock::new((Instant::now(), config)),
        }
    }

    /// Current settings, re-read from disk if the cached copy went stale.
    pub fn current(&self) -> Config {
        {
            let guard = self.cached.read().unwrap_or_else(|e| e.into_inner());
            if guard.0.elapsed() < self.ttl {
                return guard.1.clone();
            }
        }

        let mut guard = self.cached.write().unwrap_or_else(|e| e.into_inner());
        // Another task may have refreshed while we waited for the lock.
        if guard.0.elapsed() < self.ttl {
            return guard.1.clone();
        }

        match Config::load_from_path(&self.path) {
            Ok(fresh) => {
                guard.1 = fresh;
            }
            Err(e) => {
                warn!("Config reload failed, keeping last good settings: {}", e);
            }
        }
        guard.0 = Instant::now();
        guard.1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.threshold, 3);
        assert!((config.engine.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.engine.cooldown_window_secs, 1_800);
        assert!(config.engine.system_keywords.contains(&"down".to_string()));
        assert_eq!(config.llm.max_retries, 2);
    }

    #[test]
    fn test_parse_toml_with_defaults_for_missing_fields() {
        let toml_str = r#"
[engine]
threshold = 5
similarity_threshold = 0.6

[llm]
model = "custom:3b"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.threshold, 5);
        assert!((config.engine.similarity_threshold - 0.6).abs() < f64::EPSILON);
        // Defaults fill the rest
        assert_eq!(config.engine.recent_window_secs, 900);
        assert_eq!(config.llm.model, "custom:3b");
        assert_eq!(config.llm.timeout_secs, 4);
    }

    #[test]
    fn test_settings_source_reloads_after_ttl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nthreshold = 2").unwrap();
        file.flush().unwrap();

        let source = SettingsSource::with_ttl(file.path(), Duration::from_millis(0));
        assert_eq!(source.current().engine.threshold, 2);

        std::fs::write(file.path(), "[engine]\nthreshold = 7\n").unwrap();
        assert_eq!(source.current().engine.threshold, 7);
    }

    #[test]
    fn test_settings_source_keeps_last_good_on_malformed_reload() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nthreshold = 4").unwrap();
        file.flush().unwrap();

        let source = SettingsSource::with_ttl(file.path(), Duration::from_millis(0));
        assert_eq!(source.current().engine.threshold, 4);

        std::fs::write(file.path(), "not toml at all [[[").unwrap();
        assert_eq!(source.current().engine.threshold, 4);
    }

    #[test]
    fn test_fixed_source_never_reads_disk() {
        let mut config = Config::default();
        config.engine.threshold = 9;
        let source = SettingsSource::fixed(config);
        assert_eq!(source.current().engine.threshold, 9);
    }
}
