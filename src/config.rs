use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::artifacts::{ArtifactSource, RetryPolicy};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct TraitSenseConfig {
    pub server: ServerConfig,
    pub embedding: EmbeddingConfig,
    pub data: DataConfig,
    pub policy: PolicyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub transport: String,
    pub log_level: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    pub cache_dir: String,
    pub dims: usize,
    pub max_seq_len: usize,
    pub intra_threads: usize,
}

/// Where the precomputed trait artifacts live and how hard to try fetching them.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// Directory path or `http(s)://` base URL holding both artifact files.
    pub source: String,
    pub traits_file: String,
    pub embeddings_file: String,
    /// Retries after the first failed attempt.
    pub fetch_retries: u32,
    /// Initial backoff; doubled after every failed attempt.
    pub backoff_ms: u64,
}

/// Score cutoffs applied by callers of the ranker. The ranker itself never filters.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PolicyConfig {
    pub identify_threshold: f32,
    pub judge_threshold: f32,
    pub max_results: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            log_level: "info".into(),
            host: "127.0.0.1".into(),
            port: 8931,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let cache_dir = default_traitsense_dir()
            .join("models")
            .to_string_lossy()
            .into_owned();
        Self {
            provider: "local".into(),
            model: "bge-small-zh-v1.5".into(),
            cache_dir,
            dims: crate::embedding::DEFAULT_EMBEDDING_DIM,
            max_seq_len: 512,
            intra_threads: 4,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        let source = default_traitsense_dir()
            .join("data")
            .to_string_lossy()
            .into_owned();
        Self {
            source,
            traits_file: crate::artifacts::TRAITS_FILE.into(),
            embeddings_file: crate::artifacts::EMBEDDINGS_FILE.into(),
            fetch_retries: 3,
            backoff_ms: 1000,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            identify_threshold: crate::policy::DEFAULT_IDENTIFY_THRESHOLD,
            judge_threshold: crate::policy::DEFAULT_JUDGE_THRESHOLD,
            max_results: 5,
        }
    }
}

impl DataConfig {
    pub fn artifact_source(&self) -> ArtifactSource {
        ArtifactSource::new(&self.source, &self.traits_file, &self.embeddings_file)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.fetch_retries,
            base_delay: Duration::from_millis(self.backoff_ms),
        }
    }
}

/// Returns `~/.traitsense/`
pub fn default_traitsense_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".traitsense")
}

/// Returns the default config file path: `~/.traitsense/config.toml`
pub fn default_config_path() -> PathBuf {
    default_traitsense_dir().join("config.toml")
}

impl TraitSenseConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            TraitSenseConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (TRAITSENSE_DATA, TRAITSENSE_MODEL_DIR, TRAITSENSE_LOG_LEVEL).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("TRAITSENSE_DATA") {
            self.data.source = val;
        }
        if let Ok(val) = std::env::var("TRAITSENSE_MODEL_DIR") {
            self.embedding.cache_dir = val;
        }
        if let Ok(val) = std::env::var("TRAITSENSE_LOG_LEVEL") {
            self.server.log_level = val;
        }
    }

    /// Resolve the model directory, expanding `~` if needed.
    pub fn resolved_model_dir(&self) -> PathBuf {
        expand_tilde(&self.embedding.cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
