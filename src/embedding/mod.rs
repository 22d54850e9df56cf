/// Embedding & indexing
///
/// Architecture:
/// - EmbeddingProvider trait for abstraction
/// - FastEmbedProvider for local embedding (all-MiniLM-L6-v2 or a multilingual model)
/// - PassageIndex trait, implemented by the HNSW-backed HnswIndex
mod provider;
mod vector_index;

pub use provider::{
    model_dimension, supported_models, EmbeddingError, EmbeddingProvider, FastEmbedProvider,
};
pub use vector_index::{HnswIndex, IndexError, IndexStats, PassageIndex};

use serde::{Deserialize, Serialize};

/// HNSW graph parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Number of connections per layer
    pub m: usize,
    /// Construction parameter (higher = better recall, slower build)
    pub ef_construction: usize,
    /// Search parameter, raised to `k` when smaller
    pub ef_search: usize,
    /// Capacity of the graph
    pub max_elements: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
            max_elements: 100_000,
        }
    }
}
