//! Storage layer for kudo-rag
//!
//! Persists vector collections and reads passages handed over by ingestion

pub mod collection;
pub mod passages;

use std::path::PathBuf;
use thiserror::Error;

pub use collection::{CollectionSnapshot, CollectionStore, SnapshotRecord};
pub use passages::{derive_passage_id, load_passages, parse_passages};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error("Collection not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Corrupted collection: {0}")]
    Corrupted(String),
}
