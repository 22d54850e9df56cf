//! Configuration management for kudo-rag
//!
//! Configuration is read once from a TOML file, optionally adjusted by a named
//! profile and `KUDO_RAG_<SECTION>__<KEY>` environment variables, validated,
//! and then handed section by section to the components that need it.

use crate::embedding::HnswParams;
use crate::error::{KudoError, Result};
use crate::retrieval::MetadataFilter;
use crate::storage::CollectionStore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

const ENV_PREFIX: &str = "KUDO_RAG_";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub indexing: IndexingConfig,
    pub llm: LlmConfig,
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where collections live on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub collection_name: String,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub model: String,
    pub batch_size: usize,
}

/// HNSW indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub max_elements: usize,
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub enabled: bool,
    pub provider: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Overrides the provider's default URL (e.g. a remote Ollama host)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "groq".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 0.3,
            max_tokens: default_max_tokens(),
            endpoint: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of passages returned
    pub top_k: usize,
    /// Minimum cosine similarity kept after base retrieval
    pub similarity_threshold: f32,
    pub enable_reranking: bool,
    pub enable_reformulation: bool,
    pub reranker_model: String,
    /// LLM paraphrases generated per query
    pub num_variations: usize,
    pub rrf_k: f32,
    /// Query variants retrieved at the same time
    pub max_concurrent_variants: usize,
    /// Applied to every retrieval unless a call supplies its own
    pub metadata_filters: MetadataFilter,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            similarity_threshold: 0.7,
            enable_reranking: false,
            enable_reformulation: true,
            reranker_model: "bge-reranker-v2-m3".to_string(),
            num_variations: 2,
            rrf_k: crate::retrieval::DEFAULT_RRF_K,
            max_concurrent_variants: 4,
            metadata_filters: MetadataFilter::default(),
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_reranking: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_reformulation: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_variations: Option<usize>,
}

fn parse_env<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| KudoError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load configuration with a specific profile applied
    ///
    /// Environment overrides are applied after the profile.
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::read(path)?;
        config.apply_profile(profile)?;
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Load `path`, or fall back to validated defaults when it does not exist
    ///
    /// A profile can only come from a config file, so asking for one without
    /// a file is an error.
    pub fn load_or_default(path: &Path, profile: Option<&str>) -> Result<Self> {
        if path.exists() {
            return match profile {
                Some(profile) => Self::load_with_profile(path, profile),
                None => Self::load(path),
            };
        }

        if let Some(profile) = profile {
            return Err(KudoError::Config(format!(
                "Profile '{}' requested but no config file exists at {:?}",
                profile, path
            )));
        }

        tracing::warn!("Config file not found, using defaults. Run 'kudo-rag config init' to create one.");
        let mut config = Self::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(KudoError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| KudoError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KudoError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| KudoError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| KudoError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        if let Some(threshold) = overrides.similarity_threshold {
            self.retrieval.similarity_threshold = threshold;
        }
        if let Some(enabled) = overrides.enable_reranking {
            self.retrieval.enable_reranking = enabled;
        }
        if let Some(enabled) = overrides.enable_reformulation {
            self.retrieval.enable_reformulation = enabled;
        }
        if let Some(n) = overrides.num_variations {
            self.retrieval.num_variations = n;
        }

        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: KUDO_RAG_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__COLLECTION_NAME" => self.storage.collection_name = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "LLM__ENABLED" => self.llm.enabled = parse_env(path, value)?,
            "LLM__PROVIDER" => self.llm.provider = value.to_string(),
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "LLM__ENDPOINT" => self.llm.endpoint = Some(value.to_string()),
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__SIMILARITY_THRESHOLD" => {
                self.retrieval.similarity_threshold = parse_env(path, value)?
            }
            "RETRIEVAL__ENABLE_RERANKING" => {
                self.retrieval.enable_reranking = parse_env(path, value)?
            }
            "RETRIEVAL__ENABLE_REFORMULATION" => {
                self.retrieval.enable_reformulation = parse_env(path, value)?
            }
            "RETRIEVAL__RERANKER_MODEL" => self.retrieval.reranker_model = value.to_string(),
            "RETRIEVAL__NUM_VARIATIONS" => {
                self.retrieval.num_variations = parse_env(path, value)?
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// HNSW parameters for the configured index
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.indexing.hnsw_m,
            ef_construction: self.indexing.hnsw_ef_construction,
            ef_search: self.indexing.hnsw_ef_search,
            max_elements: self.indexing.max_elements,
        }
    }

    /// Store for the configured collection
    pub fn collection_store(&self) -> CollectionStore {
        CollectionStore::new(
            self.storage.data_dir.join("collections"),
            self.storage.collection_name.clone(),
        )
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| KudoError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("kudo-rag").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| KudoError::Config("Cannot determine data directory".to_string()))?;

        Ok(data_dir.join("kudo-rag"))
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::default_data_dir().unwrap_or_else(|_| PathBuf::from(".kudo-rag"));

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir,
                collection_name: "kudo_arbitrage".to_string(),
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
                batch_size: 32,
            },
            indexing: IndexingConfig {
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 64,
                max_elements: 100_000,
            },
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            profiles: HashMap::new(),
        }
    }
}
