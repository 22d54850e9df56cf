/// HNSW passage index for similarity search
use super::{EmbeddingError, EmbeddingProvider, HnswParams};
use crate::retrieval::{MetadataFilter, Passage, ScoredPassage};
use crate::storage::{CollectionSnapshot, CollectionStore, SnapshotRecord, StorageError};
use ahash::AHashSet;
use hnsw_rs::prelude::*;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Upper bound on HNSW layers, as recommended by hnsw_rs
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Collection not found: {0}")]
    NotFound(String),

    #[error("Collection '{0}' is empty")]
    Empty(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Collection was built with model '{stored}', but '{configured}' is configured")]
    ModelMismatch { stored: String, configured: String },

    #[error("Collection is full: {max_elements} elements")]
    Capacity { max_elements: usize },

    #[error("Index lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Store of passages searchable by semantic similarity
pub trait PassageIndex: Send + Sync {
    /// Embed `text` and return up to `k` passages, most similar first
    fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredPassage>, IndexError>;

    /// Return up to `k` passages nearest to `vector`, most similar first
    fn query_by_vector(&self, vector: &[f32], k: usize)
        -> Result<Vec<ScoredPassage>, IndexError>;

    /// Add passages whose ids are not yet indexed. Returns how many were added.
    fn insert(&self, passages: &[Passage]) -> Result<usize, IndexError>;

    /// Up to `limit` passages whose metadata matches `filter`, in indexing order
    fn find_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<Arc<Passage>>, IndexError>;

    fn count(&self) -> usize;

    /// Drop every passage and any persisted state
    fn delete_collection(&self) -> Result<(), IndexError>;
}

/// Collection summary
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub collection_name: String,
    pub count: usize,
    pub embedding_model: String,
    pub dimension: usize,
    pub path: Option<PathBuf>,
}

struct IndexState {
    graph: Hnsw<'static, f32, DistCosine>,
    /// Position in these vectors is the HNSW data id
    passages: Vec<Arc<Passage>>,
    embeddings: Vec<Vec<f32>>,
    ids: AHashSet<String>,
}

impl IndexState {
    fn new(params: &HnswParams) -> Self {
        Self {
            graph: new_graph(params),
            passages: Vec::new(),
            embeddings: Vec::new(),
            ids: AHashSet::new(),
        }
    }

    fn push(&mut self, passage: Passage, embedding: Vec<f32>) {
        let data_id = self.passages.len();
        self.graph.insert_slice((embedding.as_slice(), data_id));
        self.ids.insert(passage.id.clone());
        self.passages.push(Arc::new(passage));
        self.embeddings.push(embedding);
    }

    /// Rebuild the graph from the first `len` entries
    fn truncated(&self, params: &HnswParams, len: usize) -> Self {
        let mut state = Self::new(params);
        for (passage, embedding) in self.passages.iter().zip(&self.embeddings).take(len) {
            state.push(Passage::clone(passage), embedding.clone());
        }
        state
    }
}

fn new_graph(params: &HnswParams) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::<f32, DistCosine>::new(
        params.m,
        params.max_elements,
        MAX_LAYERS,
        params.ef_construction,
        DistCosine {},
    )
}

/// Cosine distance to similarity in [0, 1]
fn similarity(distance: f32) -> f32 {
    let score = 1.0 - distance;
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// HNSW-backed passage index
///
/// Keeps the graph in memory and, when opened with a [`CollectionStore`],
/// persists passages and embeddings after each insert so the graph can be
/// rebuilt on the next start.
pub struct HnswIndex {
    provider: Arc<dyn EmbeddingProvider>,
    params: HnswParams,
    collection_name: String,
    store: Option<CollectionStore>,
    batch_size: usize,
    state: RwLock<IndexState>,
}

impl HnswIndex {
    /// Create an empty, memory-only index
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        params: HnswParams,
        collection_name: &str,
    ) -> Self {
        let state = IndexState::new(&params);
        Self {
            provider,
            params,
            collection_name: collection_name.to_string(),
            store: None,
            batch_size: 32,
            state: RwLock::new(state),
        }
    }

    /// Open an existing persisted collection
    ///
    /// Returns [`IndexError::NotFound`] when nothing was indexed yet.
    pub fn open(
        provider: Arc<dyn EmbeddingProvider>,
        params: HnswParams,
        store: CollectionStore,
    ) -> Result<Self, IndexError> {
        let snapshot = store.load().map_err(|e| match e {
            StorageError::NotFound { .. } => {
                IndexError::NotFound(store.collection_name().to_string())
            }
            other => IndexError::Storage(other),
        })?;

        if snapshot.embedding_model != provider.model_name() {
            return Err(IndexError::ModelMismatch {
                stored: snapshot.embedding_model,
                configured: provider.model_name().to_string(),
            });
        }
        if snapshot.dimension != provider.dimension() {
            return Err(IndexError::InvalidDimension {
                expected: provider.dimension(),
                actual: snapshot.dimension,
            });
        }

        let mut state = IndexState::new(&params);
        for record in snapshot.records {
            if record.embedding.len() != snapshot.dimension {
                return Err(IndexError::InvalidDimension {
                    expected: snapshot.dimension,
                    actual: record.embedding.len(),
                });
            }
            state.push(record.passage, record.embedding);
        }

        info!(
            "Opened collection '{}' with {} passages",
            snapshot.collection_name,
            state.passages.len()
        );

        Ok(Self {
            provider,
            params,
            collection_name: snapshot.collection_name,
            store: Some(store),
            batch_size: 32,
            state: RwLock::new(state),
        })
    }

    /// Open the collection if it exists, otherwise start an empty persisted one
    pub fn open_or_create(
        provider: Arc<dyn EmbeddingProvider>,
        params: HnswParams,
        store: CollectionStore,
    ) -> Result<Self, IndexError> {
        if store.exists() {
            return Self::open(provider, params, store);
        }

        let mut index = Self::new(provider, params, store.collection_name());
        index.store = Some(store);
        Ok(index)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stats(&self) -> Result<IndexStats, IndexError> {
        Ok(IndexStats {
            collection_name: self.collection_name.clone(),
            count: self.read()?.passages.len(),
            embedding_model: self.provider.model_name().to_string(),
            dimension: self.provider.dimension(),
            path: self.store.as_ref().map(|s| s.path()),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, IndexState>, IndexError> {
        self.state.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, IndexState>, IndexError> {
        self.state.write().map_err(|_| IndexError::LockPoisoned)
    }

    fn persist(&self, state: &IndexState) -> Result<(), IndexError> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let mut snapshot = CollectionSnapshot::new(
            &self.collection_name,
            self.provider.model_name(),
            self.provider.dimension(),
        );
        snapshot.records = state
            .passages
            .iter()
            .zip(&state.embeddings)
            .map(|(passage, embedding)| SnapshotRecord {
                passage: Passage::clone(passage),
                embedding: embedding.clone(),
            })
            .collect();

        store.save(&snapshot)?;
        debug!("Persisted {} passages to {}", snapshot.records.len(), store.path().display());
        Ok(())
    }
}

impl PassageIndex for HnswIndex {
    fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
        if self.read()?.passages.is_empty() {
            return Err(IndexError::Empty(self.collection_name.clone()));
        }
        let vector = self.provider.embed(text)?;
        self.query_by_vector(&vector, k)
    }

    fn query_by_vector(
        &self,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>, IndexError> {
        let dimension = self.provider.dimension();
        if vector.len() != dimension {
            return Err(IndexError::InvalidDimension {
                expected: dimension,
                actual: vector.len(),
            });
        }

        let state = self.read()?;
        if state.passages.is_empty() {
            return Err(IndexError::Empty(self.collection_name.clone()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let ef_search = self.params.ef_search.max(k);
        let neighbours = state.graph.search(vector, k, ef_search);

        let mut results: Vec<ScoredPassage> = neighbours
            .into_iter()
            .filter_map(|n| {
                state
                    .passages
                    .get(n.d_id)
                    .map(|p| ScoredPassage::similarity(Arc::clone(p), similarity(n.distance)))
            })
            .collect();
        crate::retrieval::sort_by_score_desc(&mut results);

        Ok(results)
    }

    fn insert(&self, passages: &[Passage]) -> Result<usize, IndexError> {
        let mut state = self.write()?;

        let mut seen = AHashSet::new();
        let fresh: Vec<&Passage> = passages
            .iter()
            .filter(|p| !state.ids.contains(&p.id) && seen.insert(p.id.as_str()))
            .collect();

        if fresh.is_empty() {
            info!("No new passages to index");
            return Ok(0);
        }
        if state.passages.len() + fresh.len() > self.params.max_elements {
            return Err(IndexError::Capacity {
                max_elements: self.params.max_elements,
            });
        }

        // Embed everything before touching the graph
        let dimension = self.provider.dimension();
        let mut embedded = Vec::with_capacity(fresh.len());
        for batch in fresh.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.content.clone()).collect();
            let embeddings = self.provider.embed_batch(&texts)?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::GenerationError(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }
            if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension) {
                return Err(IndexError::InvalidDimension {
                    expected: dimension,
                    actual: bad.len(),
                });
            }
            embedded.extend(batch.iter().copied().zip(embeddings));
            debug!("Embedded batch of {} passages", batch.len());
        }

        let previous = state.passages.len();
        for (passage, embedding) in embedded {
            state.push(Passage::clone(passage), embedding);
        }

        if let Err(e) = self.persist(&state) {
            warn!("Persisting collection failed, rolling back to {} passages", previous);
            let restored = state.truncated(&self.params, previous);
            *state = restored;
            return Err(e);
        }
        info!(
            "Indexed {} new passages into '{}' ({} total)",
            fresh.len(),
            self.collection_name,
            state.passages.len()
        );

        Ok(fresh.len())
    }

    fn find_by_metadata(
        &self,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<Arc<Passage>>, IndexError> {
        let state = self.read()?;
        let found: Vec<Arc<Passage>> = state
            .passages
            .iter()
            .filter(|p| filter.matches(&p.metadata))
            .take(limit)
            .cloned()
            .collect();
        debug!("Metadata lookup matched {} passages", found.len());
        Ok(found)
    }

    fn count(&self) -> usize {
        match self.read() {
            Ok(state) => state.passages.len(),
            Err(e) => {
                error!("Cannot count passages in '{}': {}", self.collection_name, e);
                0
            }
        }
    }

    fn delete_collection(&self) -> Result<(), IndexError> {
        let mut state = self.write()?;
        *state = IndexState::new(&self.params);

        if let Some(store) = &self.store {
            store.delete()?;
        }
        info!("Deleted collection '{}'", self.collection_name);
        Ok(())
    }
}
