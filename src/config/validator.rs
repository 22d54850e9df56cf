use crate::config::{Config, SCHEMA_VERSION};
use crate::embedding::{model_dimension, supported_models};
use crate::error::{KudoError, Result, ValidationError};

const VALID_PROVIDERS: [&str; 4] = ["groq", "openai", "anthropic", "ollama"];
const VALID_RERANKERS: [&str; 2] = ["bge-reranker-base", "bge-reranker-v2-m3"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every violation at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_llm(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KudoError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        // The name becomes a file name
        let name = &config.storage.collection_name;
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            errors.push(ValidationError::new(
                "storage.collection_name",
                format!(
                    "Collection name must be non-empty and use only letters, digits, '_' or '-', got '{}'",
                    name
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        let model = &config.embedding.model;
        if model_dimension(model).is_none() {
            errors.push(ValidationError::new(
                "embedding.model",
                format!(
                    "Unsupported model '{}'. Supported: {}",
                    model,
                    supported_models().collect::<Vec<_>>().join(", ")
                ),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        let checks = [
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
            ("indexing.max_elements", indexing.max_elements),
        ];
        for (path, value) in checks {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = &config.llm.provider;
        if !VALID_PROVIDERS.contains(&provider.as_str()) {
            errors.push(ValidationError::new(
                "llm.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    VALID_PROVIDERS, provider
                ),
            ));
        }

        // Local Ollama needs no key
        if config.llm.enabled && provider != "ollama" {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.max_tokens == 0 {
            errors.push(ValidationError::new(
                "llm.max_tokens",
                "Max tokens must be greater than 0",
            ));
        }

        if config.llm.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "llm.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.top_k == 0 {
            errors.push(ValidationError::new(
                "retrieval.top_k",
                "top_k must be greater than 0",
            ));
        }

        let threshold = retrieval.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            errors.push(ValidationError::new(
                "retrieval.similarity_threshold",
                format!("Similarity threshold must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        if !retrieval.rrf_k.is_finite() || retrieval.rrf_k < 0.0 {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be a non-negative number, got {}", retrieval.rrf_k),
            ));
        }

        if retrieval.max_concurrent_variants == 0 {
            errors.push(ValidationError::new(
                "retrieval.max_concurrent_variants",
                "Must be greater than 0",
            ));
        }

        if retrieval.enable_reformulation && retrieval.num_variations == 0 {
            errors.push(ValidationError::new(
                "retrieval.num_variations",
                "At least one variation is needed when reformulation is enabled",
            ));
        }

        let reranker = retrieval
            .reranker_model
            .strip_prefix("BAAI/")
            .unwrap_or(&retrieval.reranker_model);
        if retrieval.enable_reranking && !VALID_RERANKERS.contains(&reranker) {
            errors.push(ValidationError::new(
                "retrieval.reranker_model",
                format!(
                    "Reranker must be one of {:?}, got '{}'",
                    VALID_RERANKERS, retrieval.reranker_model
                ),
            ));
        }
    }
}
