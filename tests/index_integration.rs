//! Indexing integration tests
//!
//! Loads passages from JSON Lines, indexes them into a persisted HNSW
//! collection and retrieves through the full pipeline.

use kudo_rag::config::Config;
use kudo_rag::embedding::{
    EmbeddingError, EmbeddingProvider, FastEmbedProvider, HnswIndex, HnswParams, IndexError,
    PassageIndex,
};
use kudo_rag::retrieval::{KudoRetriever, RetrievalConfig, SourceCitation};
use kudo_rag::storage::{load_passages, CollectionStore};
use std::sync::Arc;
use tempfile::TempDir;

const PASSAGES: &str = r#"{"id": "art-3", "content": "Un waza-ari est accordé pour une technique de frappe nette et contrôlée.", "metadata": {"section": "Article 3", "category": "scoring", "article_reference": "Art. 3"}}
{"id": "art-7", "content": "Toute faute grave entraîne une sanction, jusqu'à la disqualification.", "metadata": {"section": "Article 7", "category": "sanctions", "article_reference": "Art. 7"}}
{"id": "art-9", "content": "La protection de tête et les gants sont obligatoires pendant le combat.", "metadata": {"section": "Article 9", "category": "equipement"}}
{"content": "L'arbitre annonce le début et la fin de chaque round.", "metadata": {"file_name": "reglement.pdf", "chunk_id": 12}}
"#;

const VOCABULARY: &[&str] = &[
    "waza", "frappe", "faute", "sanction", "protection", "gants", "arbitre", "round",
];

/// Bag-of-words over a tiny refereeing vocabulary
struct VocabularyProvider;

impl EmbeddingProvider for VocabularyProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = VOCABULARY
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        vector.push(0.05);
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn model_name(&self) -> &str {
        "vocabulary"
    }
}

fn params() -> HnswParams {
    HnswParams {
        max_elements: 1_000,
        ..HnswParams::default()
    }
}

fn setup(temp: &TempDir) -> (CollectionStore, HnswIndex) {
    let file = temp.path().join("passages.jsonl");
    std::fs::write(&file, PASSAGES).unwrap();
    let passages = load_passages(&file).unwrap();
    assert_eq!(passages.len(), 4);

    let store = CollectionStore::new(temp.path().join("collections"), "kudo_arbitrage");
    let index =
        HnswIndex::open_or_create(Arc::new(VocabularyProvider), params(), store.clone()).unwrap();
    assert_eq!(index.insert(&passages).unwrap(), 4);

    (store, index)
}

#[test]
fn test_index_persists_across_reopen() {
    let temp = TempDir::new().unwrap();
    let (store, index) = setup(&temp);
    drop(index);

    let reopened = HnswIndex::open(Arc::new(VocabularyProvider), params(), store.clone()).unwrap();
    assert_eq!(reopened.count(), 4);

    let results = reopened.query("Quelle sanction pour une faute ?", 1).unwrap();
    assert_eq!(results[0].id(), "art-7");

    // Re-indexing the same file adds nothing
    let passages = load_passages(&temp.path().join("passages.jsonl")).unwrap();
    assert_eq!(reopened.insert(&passages).unwrap(), 0);
}

#[test]
fn test_reopen_with_other_model_is_rejected() {
    struct OtherModel;

    impl EmbeddingProvider for OtherModel {
        fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            VocabularyProvider.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            VocabularyProvider.embed_batch(texts)
        }

        fn dimension(&self) -> usize {
            VocabularyProvider.dimension()
        }

        fn model_name(&self) -> &str {
            "other"
        }
    }

    let temp = TempDir::new().unwrap();
    let (store, _index) = setup(&temp);

    assert!(matches!(
        HnswIndex::open(Arc::new(OtherModel), params(), store),
        Err(IndexError::ModelMismatch { .. })
    ));
}

#[tokio::test]
async fn test_retrieve_from_persisted_collection() {
    let temp = TempDir::new().unwrap();
    let (_store, index) = setup(&temp);

    let config = RetrievalConfig {
        top_k: 2,
        similarity_threshold: 0.5,
        enable_reformulation: false,
        ..RetrievalConfig::default()
    };
    let retriever = KudoRetriever::new(Arc::new(index), config).unwrap();

    // "faute" expands with "sanction", which pulls Article 7 to the top
    let retrieval = retriever
        .retrieve_with_confidence("Que risque-t-on pour une faute ?")
        .await
        .unwrap();

    assert_eq!(retrieval.passages.len(), 1);
    assert_eq!(retrieval.passages[0].id(), "art-7");
    assert!(retrieval.confidence > 0.5);

    let citations = SourceCitation::from_passages(&retrieval.passages);
    assert_eq!(citations[0].source_id, 1);
    assert_eq!(citations[0].article_ref, "Art. 7");

    let by_category = retriever
        .retrieve_by_category("Que risque-t-on pour une faute ?", "scoring")
        .await
        .unwrap();
    assert!(by_category.is_empty());
}

#[test]
fn test_delete_collection_removes_snapshot() {
    let temp = TempDir::new().unwrap();
    let (store, index) = setup(&temp);
    assert!(store.exists());

    index.delete_collection().unwrap();
    assert_eq!(index.count(), 0);
    assert!(!store.exists());
    assert!(matches!(
        index.query("faute", 3),
        Err(IndexError::Empty(_))
    ));
}

#[tokio::test]
#[ignore] // Requires model download (~90MB) - run with: cargo test -- --ignored
async fn test_fastembed_collection_end_to_end() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("passages.jsonl");
    std::fs::write(&file, PASSAGES).unwrap();

    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.retrieval.enable_reformulation = false;
    config.retrieval.similarity_threshold = 0.2;

    let provider = Arc::new(FastEmbedProvider::new(&config.embedding.model).unwrap());
    let index =
        HnswIndex::open_or_create(provider, config.hnsw_params(), config.collection_store())
            .unwrap();
    index.insert(&load_passages(&file).unwrap()).unwrap();

    let retriever = KudoRetriever::new(Arc::new(index), config.retrieval.clone()).unwrap();
    let passages = retriever
        .retrieve("Which equipment is mandatory: head protection and gloves?")
        .await
        .unwrap();

    assert!(!passages.is_empty());
    assert!(passages.len() <= config.retrieval.top_k);
    assert_eq!(passages[0].id(), "art-9");
}
