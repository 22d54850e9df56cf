//! Retrieval pipeline
//!
//! Query reformulation, multi-query retrieval, Reciprocal Rank Fusion,
//! similarity and metadata filtering, optional cross-encoder reranking and a
//! confidence estimate over the final passages.

mod confidence;
mod expansion;
mod filter;
mod fusion;
mod passage;
mod reformulator;
mod reranker;
mod retriever;

pub use crate::config::RetrievalConfig;
pub use confidence::estimate_confidence;
pub use expansion::expand_query;
pub use filter::{filter_by_similarity, FilterError, MetadataFilter};
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError, DEFAULT_RRF_K};
pub use passage::{
    format_context, sort_by_score_desc, Passage, PassageMetadata, ScoreKind, ScoredPassage,
    SourceCitation,
};
pub use reformulator::{dedup_queries, parse_generated_lines, QueryReformulator};
pub use reranker::{CrossEncoder, FastEmbedCrossEncoder, RerankError, Reranker};
pub use retriever::{KudoRetriever, Retrieval};

use crate::embedding::IndexError;
use crate::llm::ChatMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Candidates fetched per variant, as a multiple of `top_k`
pub const OVERSAMPLING_FACTOR: usize = 3;

/// Conversation turns folded into an enriched query
pub const CONTEXT_TURNS: usize = 3;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Fusion(#[from] FusionError),

    #[error("Invalid retrieval configuration: {0}")]
    Config(String),

    #[error("Retrieval task failed: {0}")]
    Task(String),
}

impl RetrievalError {
    /// True when no collection is available to search yet
    pub fn is_not_ready(&self) -> bool {
        matches!(
            self,
            RetrievalError::Index(IndexError::NotFound(_) | IndexError::Empty(_))
        )
    }
}

/// User question with optional conversation history
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            history: Vec::new(),
        }
    }

    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Query text prefixed with the last few history turns
    pub fn enriched_text(&self) -> String {
        let context: Vec<&str> = self.history.iter().map(|m| m.content.as_str()).collect();
        enrich_with_context(&self.text, &context)
    }
}

/// Prefix `query` with the last [`CONTEXT_TURNS`] context strings
pub fn enrich_with_context<S: AsRef<str>>(query: &str, context: &[S]) -> String {
    if context.is_empty() {
        return query.to_string();
    }

    let start = context.len().saturating_sub(CONTEXT_TURNS);
    let recent: Vec<&str> = context[start..].iter().map(|c| c.as_ref()).collect();
    format!("{} {}", recent.join(" "), query)
}
