//! Retrieval orchestrator

use crate::config::RetrievalConfig;
use crate::embedding::{IndexError, PassageIndex};
use crate::retrieval::{
    enrich_with_context, estimate_confidence, expand_query, filter_by_similarity,
    reciprocal_rank_fusion, FusionConfig, MetadataFilter, Query, QueryReformulator, Reranker,
    RetrievalError, ScoredPassage, OVERSAMPLING_FACTOR,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

/// Final passages with a confidence estimate
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    pub passages: Vec<ScoredPassage>,
    pub confidence: f32,
}

fn task_error(e: JoinError) -> RetrievalError {
    RetrievalError::Task(e.to_string())
}

/// Multi-query retriever for the Kudo rule books
///
/// Holds no per-call state, so one instance can serve concurrent requests.
pub struct KudoRetriever {
    index: Arc<dyn PassageIndex>,
    reformulator: Option<Arc<QueryReformulator>>,
    reranker: Arc<Reranker>,
    config: RetrievalConfig,
    fusion: FusionConfig,
}

impl KudoRetriever {
    /// Create a retriever without reformulation or reranking models
    pub fn new(index: Arc<dyn PassageIndex>, config: RetrievalConfig) -> Result<Self, RetrievalError> {
        if config.top_k == 0 {
            return Err(RetrievalError::Config("top_k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&config.similarity_threshold) {
            return Err(RetrievalError::Config(format!(
                "similarity_threshold must be in [0, 1], got {}",
                config.similarity_threshold
            )));
        }
        let fusion = FusionConfig::new(config.rrf_k)?;

        info!(
            "KudoRetriever initialized (top_k={}, threshold={}, reformulation={}, reranking={})",
            config.top_k,
            config.similarity_threshold,
            config.enable_reformulation,
            config.enable_reranking
        );

        Ok(Self {
            index,
            reformulator: None,
            reranker: Arc::new(Reranker::disabled()),
            config,
            fusion,
        })
    }

    pub fn with_reformulator(mut self, reformulator: Arc<QueryReformulator>) -> Self {
        self.reformulator = Some(reformulator);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Candidates requested from the index per query variant
    pub fn candidate_count(&self) -> usize {
        self.config.top_k * OVERSAMPLING_FACTOR
    }

    fn reformulation_active(&self) -> Option<&Arc<QueryReformulator>> {
        if self.config.enable_reformulation {
            self.reformulator.as_ref()
        } else {
            None
        }
    }

    /// Retrieve with the configured metadata filters
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredPassage>, RetrievalError> {
        self.retrieve_filtered(query, &self.config.metadata_filters)
            .await
    }

    /// Retrieve with `filters` in place of the configured ones, for this call only
    pub async fn retrieve_filtered(
        &self,
        query: &str,
        filters: &MetadataFilter,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        info!("Retrieval for: {}", query);

        let mut passages = match self.reformulation_active() {
            Some(reformulator) => {
                let variants = self.reformulate(reformulator, query).await?;
                info!("Generated {} query variants", variants.len());

                let lists = self.retrieve_variants(variants).await?;
                let fused = reciprocal_rank_fusion(&lists, &self.fusion);
                info!("Fusion: {} unique passages after RRF", fused.len());
                fused
            }
            None => {
                let expanded = expand_query(query);
                let mut lists = self.retrieve_variants(vec![expanded]).await?;
                let passages = lists.pop().unwrap_or_default();
                info!("{} passages after similarity filter", passages.len());
                passages
            }
        };

        if !filters.is_empty() {
            passages = filters.apply(passages);
            info!("{} passages after metadata filter", passages.len());
        }

        if self.config.enable_reranking && self.reranker.is_enabled() && passages.len() > 1 {
            passages = self.rerank(query, passages).await;
        }

        passages.truncate(self.config.top_k);
        info!("Returning {} passages", passages.len());
        Ok(passages)
    }

    /// Retrieve restricted to `category`, on top of the configured filters
    pub async fn retrieve_by_category(
        &self,
        query: &str,
        category: &str,
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let filters = self.config.metadata_filters.with_category(category);
        self.retrieve_filtered(query, &filters).await
    }

    /// Retrieve with the last few conversation exchanges prepended to the query
    pub async fn retrieve_with_context<S: AsRef<str>>(
        &self,
        query: &str,
        previous_context: &[S],
    ) -> Result<Vec<ScoredPassage>, RetrievalError> {
        let enriched = enrich_with_context(query, previous_context);
        if !previous_context.is_empty() {
            debug!("Query with context: {}", enriched);
        }
        self.retrieve(&enriched).await
    }

    pub async fn retrieve_query(&self, query: &Query) -> Result<Vec<ScoredPassage>, RetrievalError> {
        self.retrieve(&query.enriched_text()).await
    }

    pub async fn retrieve_with_confidence(&self, query: &str) -> Result<Retrieval, RetrievalError> {
        let passages = self.retrieve(query).await?;
        let confidence = estimate_confidence(&passages);
        debug!("Confidence: {:.3}", confidence);
        Ok(Retrieval {
            passages,
            confidence,
        })
    }

    async fn reformulate(
        &self,
        reformulator: &Arc<QueryReformulator>,
        query: &str,
    ) -> Result<Vec<String>, RetrievalError> {
        let reformulator = Arc::clone(reformulator);
        let query = query.to_string();
        tokio::task::spawn_blocking(move || reformulator.reformulate(&query, true))
            .await
            .map_err(task_error)
    }

    /// Base retrieval plus similarity filtering per variant, joined in variant order
    async fn retrieve_variants(
        &self,
        variants: Vec<String>,
    ) -> Result<Vec<Vec<ScoredPassage>>, RetrievalError> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_variants.max(1)));
        let k = self.candidate_count();
        let cutoff = self.config.similarity_threshold;

        let mut handles = Vec::with_capacity(variants.len());
        for (i, variant) in variants.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| RetrievalError::Task(e.to_string()))?;
            let index = Arc::clone(&self.index);

            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let candidates = index.query(&variant, k)?;
                let retrieved = candidates.len();
                let kept = filter_by_similarity(candidates, cutoff);
                debug!(
                    "Variant {}: {} -> {} after similarity filter",
                    i + 1,
                    retrieved,
                    kept.len()
                );
                Ok::<_, IndexError>(kept)
            }));
        }

        // Join every search before reporting the first failure
        let mut outcomes = Vec::with_capacity(handles.len());
        for handle in handles {
            outcomes.push(handle.await);
        }

        let mut lists = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            lists.push(outcome.map_err(task_error)??);
        }
        Ok(lists)
    }

    /// Rerank against `query`, keeping the current order if scoring fails
    async fn rerank(&self, query: &str, passages: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
        let reranker = Arc::clone(&self.reranker);
        let query = query.to_string();
        let candidates = passages.clone();

        match tokio::task::spawn_blocking(move || reranker.rerank(&query, &candidates, None)).await
        {
            Ok(Ok(reranked)) => {
                info!("Reranking applied");
                reranked
            }
            Ok(Err(e)) => {
                warn!("Reranking failed, keeping fused order: {}", e);
                passages
            }
            Err(e) => {
                warn!("Reranking task failed, keeping fused order: {}", e);
                passages
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Passage, PassageMetadata, ScoreKind};
    use std::sync::Mutex;

    /// Returns a fixed ranking and records the requested k
    struct FixedIndex {
        results: Vec<ScoredPassage>,
        requested: Mutex<Vec<(String, usize)>>,
    }

    impl FixedIndex {
        fn new(scores: &[(&str, f32)]) -> Self {
            let results = scores
                .iter()
                .map(|(id, score)| {
                    let passage = Passage::new(*id, format!("contenu {}", id), PassageMetadata::default());
                    ScoredPassage::similarity(Arc::new(passage), *score)
                })
                .collect();
            Self {
                results,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl PassageIndex for FixedIndex {
        fn query(&self, text: &str, k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            self.requested.lock().unwrap().push((text.to_string(), k));
            Ok(self.results.iter().take(k).cloned().collect())
        }

        fn query_by_vector(&self, _vector: &[f32], k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            Ok(self.results.iter().take(k).cloned().collect())
        }

        fn insert(&self, _passages: &[Passage]) -> Result<usize, IndexError> {
            Ok(0)
        }

        fn find_by_metadata(
            &self,
            filter: &MetadataFilter,
            limit: usize,
        ) -> Result<Vec<Arc<Passage>>, IndexError> {
            Ok(self
                .results
                .iter()
                .filter(|p| filter.matches(p.metadata()))
                .take(limit)
                .map(|p| Arc::clone(&p.passage))
                .collect())
        }

        fn count(&self) -> usize {
            self.results.len()
        }

        fn delete_collection(&self) -> Result<(), IndexError> {
            Ok(())
        }
    }

    fn config(top_k: usize) -> RetrievalConfig {
        RetrievalConfig {
            top_k,
            enable_reformulation: false,
            ..RetrievalConfig::default()
        }
    }

    #[tokio::test]
    async fn test_requests_oversampled_candidates_with_expansion() {
        let index = Arc::new(FixedIndex::new(&[("a", 0.9)]));
        let retriever = KudoRetriever::new(index.clone(), config(4)).unwrap();

        retriever.retrieve("Quelle faute ?").await.unwrap();

        let requested = index.requested.lock().unwrap();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0], ("Quelle faute ? faute sanction".to_string(), 12));
    }

    #[tokio::test]
    async fn test_similarity_threshold_and_truncation() {
        let index = Arc::new(FixedIndex::new(&[
            ("a", 0.95),
            ("b", 0.9),
            ("c", 0.8),
            ("d", 0.6),
        ]));
        let retriever = KudoRetriever::new(index, config(2)).unwrap();

        let passages = retriever.retrieve("durée du combat").await.unwrap();
        let ids: Vec<&str> = passages.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(passages.iter().all(|p| p.kind == ScoreKind::Similarity));
    }

    #[tokio::test]
    async fn test_reformulation_flag_without_model_uses_single_query() {
        let index = Arc::new(FixedIndex::new(&[("a", 0.9)]));
        let retriever = KudoRetriever::new(
            index.clone(),
            RetrievalConfig {
                enable_reformulation: true,
                ..RetrievalConfig::default()
            },
        )
        .unwrap();

        let passages = retriever.retrieve("durée du combat").await.unwrap();
        assert_eq!(passages[0].kind, ScoreKind::Similarity);
        assert_eq!(index.requested.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_index_result_gives_zero_confidence() {
        let index = Arc::new(FixedIndex::new(&[("a", 0.2)]));
        let retriever = KudoRetriever::new(index, config(5)).unwrap();

        let retrieval = retriever.retrieve_with_confidence("rien").await.unwrap();
        assert!(retrieval.passages.is_empty());
        assert_eq!(retrieval.confidence, 0.0);
    }

    #[test]
    fn test_invalid_top_k_and_threshold_rejected() {
        let index: Arc<dyn PassageIndex> = Arc::new(FixedIndex::new(&[("a", 0.9)]));

        assert!(matches!(
            KudoRetriever::new(Arc::clone(&index), config(0)),
            Err(RetrievalError::Config(_))
        ));

        for threshold in [1.5, -0.1, f32::NAN] {
            let result = KudoRetriever::new(
                Arc::clone(&index),
                RetrievalConfig {
                    similarity_threshold: threshold,
                    ..config(5)
                },
            );
            assert!(matches!(result, Err(RetrievalError::Config(_))), "{}", threshold);
        }

        let bounds = RetrievalConfig {
            similarity_threshold: 1.0,
            ..config(1)
        };
        assert!(KudoRetriever::new(index, bounds).is_ok());
    }

    /// Fails on "panne" right away, sleeps before answering anything else
    struct SlowIndex {
        completed: std::sync::atomic::AtomicUsize,
    }

    impl PassageIndex for SlowIndex {
        fn query(&self, text: &str, _k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            if text == "panne" {
                return Err(IndexError::Empty("kudo".to_string()));
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
            self.completed
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Vec::new())
        }

        fn query_by_vector(&self, _vector: &[f32], _k: usize) -> Result<Vec<ScoredPassage>, IndexError> {
            Ok(Vec::new())
        }

        fn insert(&self, _passages: &[Passage]) -> Result<usize, IndexError> {
            Ok(0)
        }

        fn find_by_metadata(
            &self,
            _filter: &MetadataFilter,
            _limit: usize,
        ) -> Result<Vec<Arc<Passage>>, IndexError> {
            Ok(Vec::new())
        }

        fn count(&self) -> usize {
            1
        }

        fn delete_collection(&self) -> Result<(), IndexError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failed_variant_waits_for_other_searches() {
        let index = Arc::new(SlowIndex {
            completed: Default::default(),
        });
        let retriever = KudoRetriever::new(index.clone(), config(3)).unwrap();

        let variants = vec![
            "premier".to_string(),
            "panne".to_string(),
            "troisième".to_string(),
            "quatrième".to_string(),
        ];
        let result = retriever.retrieve_variants(variants).await;

        assert!(matches!(
            result,
            Err(RetrievalError::Index(IndexError::Empty(_)))
        ));
        assert_eq!(
            index.completed.load(std::sync::atomic::Ordering::SeqCst),
            3
        );
    }

    #[test]
    fn test_invalid_rrf_k_rejected() {
        let index = Arc::new(FixedIndex::new(&[]));
        let result = KudoRetriever::new(
            index,
            RetrievalConfig {
                rrf_k: -1.0,
                ..RetrievalConfig::default()
            },
        );
        assert!(matches!(result, Err(RetrievalError::Fusion(_))));
    }
}
