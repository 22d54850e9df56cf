//! Cross-encoder reranking using FastEmbed

use crate::retrieval::{sort_by_score_desc, ScoreKind, ScoredPassage};
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Reranker is not enabled")]
    Disabled,

    #[error("Cross-encoder returned {actual} scores for {expected} pairs")]
    ScoreCountMismatch { expected: usize, actual: usize },
}

/// Trait for models that jointly score (query, passage) pairs
pub trait CrossEncoder: Send + Sync {
    /// Score each pair; output order matches input order
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RerankError>;

    fn model_name(&self) -> &str;
}

/// FastEmbed cross-encoder
pub struct FastEmbedCrossEncoder {
    model: Arc<TextRerank>,
    model_name: String,
}

impl FastEmbedCrossEncoder {
    /// Create a new cross-encoder with specified model
    ///
    /// # Arguments
    /// * `model_name` - "bge-reranker-base" or "bge-reranker-v2-m3" (multilingual)
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let reranker_model = match model_name {
            "bge-reranker-base" | "BAAI/bge-reranker-base" => RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" | "BAAI/bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            _ => {
                return Err(RerankError::InitializationError(format!(
                    "Unsupported reranker model: {}. Supported: bge-reranker-base, bge-reranker-v2-m3",
                    model_name
                )));
            }
        };

        info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(reranker_model).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }
}

impl CrossEncoder for FastEmbedCrossEncoder {
    fn predict(&self, pairs: &[(&str, &str)]) -> Result<Vec<f32>, RerankError> {
        let mut scores = vec![0.0; pairs.len()];

        // FastEmbed scores one query against many documents, so group
        // consecutive pairs sharing a query into a single call
        let mut start = 0;
        while start < pairs.len() {
            let query = pairs[start].0;
            let end = pairs[start..]
                .iter()
                .position(|(q, _)| *q != query)
                .map_or(pairs.len(), |offset| start + offset);

            let documents: Vec<&str> = pairs[start..end].iter().map(|(_, doc)| *doc).collect();
            let results = self
                .model
                .rerank(query, documents, false, None)
                .map_err(|e| RerankError::RerankingError(e.to_string()))?;

            if results.len() != end - start {
                return Err(RerankError::ScoreCountMismatch {
                    expected: end - start,
                    actual: results.len(),
                });
            }
            for result in results {
                scores[start + result.index] = result.score;
            }
            start = end;
        }

        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Cross-encoder reranker for improving result precision.
///
/// Holds no model when reranking is disabled or the model failed to load;
/// [`Reranker::is_enabled`] reports which.
pub struct Reranker {
    encoder: Option<Arc<dyn CrossEncoder>>,
}

impl Reranker {
    pub fn new(encoder: Arc<dyn CrossEncoder>) -> Self {
        Self {
            encoder: Some(encoder),
        }
    }

    pub fn disabled() -> Self {
        Self { encoder: None }
    }

    /// Load the configured FastEmbed model when `enabled`.
    ///
    /// A model that fails to load leaves the reranker disabled.
    pub fn load(enabled: bool, model_name: &str) -> Self {
        if !enabled {
            info!("Reranking disabled in configuration");
            return Self::disabled();
        }

        match FastEmbedCrossEncoder::new(model_name) {
            Ok(encoder) => {
                info!("Reranker initialized with {}", model_name);
                Self::new(Arc::new(encoder))
            }
            Err(e) => {
                error!("Failed to load reranker {}: {}", model_name, e);
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.encoder.as_ref().map(|e| e.model_name())
    }

    /// Rescore passages against `query` and sort by the new scores
    ///
    /// # Arguments
    /// * `query` - Original user query
    /// * `passages` - Candidates, in their current order
    /// * `limit` - Keep only the best `limit` passages if set
    ///
    /// # Returns
    /// Passages tagged [`ScoreKind::Relevance`], sorted by score descending
    pub fn rerank(
        &self,
        query: &str,
        passages: &[ScoredPassage],
        limit: Option<usize>,
    ) -> Result<Vec<ScoredPassage>, RerankError> {
        let encoder = self.encoder.as_ref().ok_or(RerankError::Disabled)?;

        if passages.is_empty() {
            return Ok(Vec::new());
        }

        info!("Reranking {} passages", passages.len());

        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.content())).collect();
        let scores = encoder.predict(&pairs)?;

        if scores.len() != passages.len() {
            return Err(RerankError::ScoreCountMismatch {
                expected: passages.len(),
                actual: scores.len(),
            });
        }

        let mut reranked: Vec<ScoredPassage> = passages
            .iter()
            .zip(scores)
            .map(|(p, score)| p.rescored(score, ScoreKind::Relevance))
            .collect();
        sort_by_score_desc(&mut reranked);

        if let Some(limit) = limit {
            reranked.truncate(limit);
        }

        let original_top = passages.first().map(|p| p.id());
        let reranked_top = reranked.first().map(|p| p.id());
        if original_top != reranked_top {
            info!("Reranking changed the top result");
            debug!("Original top: {:?}", passages.first().map(|p| p.preview(100)));
            debug!("Reranked top: {:?}", reranked.first().map(|p| p.preview(100)));
        }

        Ok(reranked)
    }

    /// Score raw pairs. Returns zeros when disabled or on model failure.
    pub fn score_pairs(&self, pairs: &[(&str, &str)]) -> Vec<f32> {
        let Some(encoder) = &self.encoder else {
            return vec![0.0; pairs.len()];
        };

        match encoder.predict(pairs) {
            Ok(scores) if scores.len() == pairs.len() => scores,
            Ok(scores) => {
                error!(
                    "Cross-encoder returned {} scores for {} pairs",
                    scores.len(),
                    pairs.len()
                );
                vec![0.0; pairs.len()]
            }
            Err(e) => {
                error!("Pair scoring failed: {}", e);
                vec![0.0; pairs.len()]
            }
        }
    }
}
