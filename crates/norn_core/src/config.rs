use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NornConfig {
    pub llm: LlmConfig,
    pub memory: MemoryConfig,
    pub pacing: PacingConfig,
    pub sweep: SweepConfig,
    pub data_dir: DataConfig,
}

impl NornConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: NornConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NORN_API_BASE") {
            self.llm.api_base = v;
        }
        if let Ok(v) = std::env::var("NORN_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("NORN_MAX_TOKENS") {
            if let Ok(n) = v.parse() {
                self.llm.max_tokens = n;
            }
        }
        if let Ok(v) = std::env::var("NORN_TEMPERATURE") {
            if let Ok(n) = v.parse() {
                self.llm.temperature = n;
            }
        }
        if let Ok(v) = std::env::var("NORN_DATA_DIR") {
            self.data_dir.root = v;
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub stop: Vec<String>,
    /// Max attempts for a single completion call (including the first).
    pub retry_attempts: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/v1".to_string(),
            model: "mistral-7b-instruct".to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.95,
            stop: vec!["<|im_end|>".to_string()],
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum turns held in the short-term buffer.
    pub max_short_term: usize,
    /// Consolidation triggers when the buffer reaches this fraction of max.
    pub consolidate_threshold: f32,
    /// Long-term memories retained per user (oldest evicted past this).
    pub max_long_term: usize,
    /// How many relevance-ranked memories go into a prompt.
    pub relevance_top_k: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_short_term: 20,
            consolidate_threshold: 0.8,
            max_long_term: 100,
            relevance_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Simulated typing speed in characters per second.
    pub typing_chars_per_sec: f64,
    pub min_typing_secs: f64,
    pub max_typing_secs: f64,
    pub min_gap_secs: f64,
    pub max_gap_secs: f64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            typing_chars_per_sec: 50.0,
            min_typing_secs: 0.5,
            max_typing_secs: 5.0,
            min_gap_secs: 2.0,
            max_gap_secs: 4.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Interval between inactivity scans, in seconds.
    pub interval_secs: u64,
    /// Minutes of silence before a reminder is considered.
    pub inactivity_threshold_mins: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 120,
            inactivity_threshold_mins: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub root: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            root: "data".to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = NornConfig::default();
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert_eq!(cfg.llm.retry_attempts, 3);
        assert_eq!(cfg.memory.max_short_term, 20);
        assert_eq!(cfg.sweep.inactivity_threshold_mins, 15);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = r#"
[llm]
model = "llama-3-8b"
"#;
        let cfg: NornConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.model, "llama-3-8b");
        // Defaults for unspecified fields
        assert_eq!(cfg.llm.max_tokens, 1024);
        assert_eq!(cfg.memory.relevance_top_k, 5);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[llm]
api_base = "https://llm.example.com/v1"
model = "mythos-70b"
max_tokens = 2048
temperature = 0.9
top_p = 0.8
stop = ["</s>"]
retry_attempts = 5

[memory]
max_short_term = 30
consolidate_threshold = 0.9
max_long_term = 50
relevance_top_k = 3

[pacing]
typing_chars_per_sec = 80.0
min_typing_secs = 0.2
max_typing_secs = 8.0

[sweep]
interval_secs = 60
inactivity_threshold_mins = 10

[data_dir]
root = "/var/lib/norn"
"#;
        let cfg: NornConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.llm.api_base, "https://llm.example.com/v1");
        assert_eq!(cfg.llm.retry_attempts, 5);
        assert_eq!(cfg.memory.max_short_term, 30);
        assert_eq!(cfg.pacing.typing_chars_per_sec, 80.0);
        assert_eq!(cfg.sweep.interval_secs, 60);
        assert_eq!(cfg.data_dir.root, "/var/lib/norn");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let cfg = NornConfig::load_or_default("/nonexistent/norn.toml");
        assert_eq!(cfg.memory.max_short_term, 20);
    }
}
