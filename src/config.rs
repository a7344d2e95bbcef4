use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::common::error::{PipelineError, Result};
use crate::domain::Venue;
use crate::pipeline::processing::dedupe::DedupeConfig;
use crate::pipeline::processing::fallback::FallbackConfig;
use crate::pipeline::processing::health::HealthConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub inference: InferenceConfig,
    pub fallback: FallbackConfig,
    pub registry: RegistryConfig,
    pub dedupe: DedupeConfig,
    pub health: HealthConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/cinema.db"),
        }
    }
}

/// OpenAI-compatible chat completions endpoint used for title fallback
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:11434/v1".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub venues_path: PathBuf,
    pub festivals_path: PathBuf,
    pub merge_blocklist_path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            venues_path: PathBuf::from("registry/venues.toml"),
            festivals_path: PathBuf::from("registry/festivals.toml"),
            merge_blocklist_path: PathBuf::from("registry/merge_blocklist.toml"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: PathBuf::from("logs") }
    }
}

impl Config {
    /// Read `path` if it exists, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .map_err(|e| PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e)))?;
            Self::from_toml_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var("CINEMA_DB_PATH") {
            self.storage.db_path = PathBuf::from(path);
        }
        if let Ok(endpoint) = env::var("INFERENCE_ENDPOINT") {
            self.inference.endpoint = endpoint;
            self.inference.enabled = true;
        }
        if let Ok(model) = env::var("INFERENCE_MODEL") {
            self.inference.model = model;
        }
        if let Ok(key) = env::var("INFERENCE_API_KEY") {
            self.inference.api_key = Some(key).filter(|k| !k.is_empty());
        }
        if let Ok(bind) = env::var("CINEMA_SERVER_BIND") {
            self.server.bind = bind;
        }
    }
}

/// Known venues, loaded from `registry/venues.toml`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VenueRegistry {
    #[serde(rename = "venue", default)]
    pub venues: Vec<Venue>,
}

impl VenueRegistry {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let registry: Self = toml::from_str(content)?;
        let mut seen = HashSet::new();
        if let Some(dup) = registry.venues.iter().find(|v| !seen.insert(v.id.as_str())) {
            return Err(PipelineError::Config(format!("duplicate venue id '{}'", dup.id)));
        }
        Ok(registry)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn ids(&self) -> HashSet<String> {
        self.venues.iter().map(|v| v.id.clone()).collect()
    }
}
