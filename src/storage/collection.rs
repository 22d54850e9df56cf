//! On-disk collection snapshots
//!
//! A collection is persisted as a single zstd-compressed JSON document
//! holding every passage with its embedding. Writes go through a temporary
//! file and an atomic rename.

use crate::retrieval::Passage;
use crate::storage::StorageError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

/// A stored passage and its embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub passage: Passage,
    pub embedding: Vec<f32>,
}

/// Full persisted state of a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub schema_version: u32,
    pub collection_name: String,
    pub embedding_model: String,
    pub dimension: usize,
    pub updated_at: DateTime<Utc>,
    pub records: Vec<SnapshotRecord>,
}

impl CollectionSnapshot {
    pub fn new(collection_name: &str, embedding_model: &str, dimension: usize) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            collection_name: collection_name.to_string(),
            embedding_model: embedding_model.to_string(),
            dimension,
            updated_at: Utc::now(),
            records: Vec::new(),
        }
    }
}

/// File-backed store for one named collection
#[derive(Debug, Clone)]
pub struct CollectionStore {
    base_path: PathBuf,
    collection_name: String,
}

impl CollectionStore {
    pub fn new(base_path: impl Into<PathBuf>, collection_name: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            collection_name: collection_name.into(),
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.base_path
            .join(format!("{}.collection.zst", self.collection_name))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(format!("{}.collection.zst.tmp", self.collection_name))
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Read the snapshot
    pub fn load(&self) -> Result<CollectionSnapshot, StorageError> {
        let path = self.path();
        if !path.exists() {
            return Err(StorageError::NotFound { path });
        }

        let compressed = fs::read(&path).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to read collection file: {}", path.display()),
        })?;
        let data = zstd::decode_all(&compressed[..]).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to decompress collection file: {}", path.display()),
        })?;

        let snapshot: CollectionSnapshot =
            serde_json::from_slice(&data).map_err(|e| StorageError::Json {
                source: e,
                context: format!("Failed to parse collection file: {}", path.display()),
            })?;

        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StorageError::Corrupted(format!(
                "Unsupported snapshot schema version {} in {}",
                snapshot.schema_version,
                path.display()
            )));
        }

        Ok(snapshot)
    }

    /// Write the snapshot atomically
    pub fn save(&self, snapshot: &CollectionSnapshot) -> Result<(), StorageError> {
        fs::create_dir_all(&self.base_path).map_err(|e| StorageError::Io {
            source: e,
            context: format!(
                "Failed to create collection directory: {}",
                self.base_path.display()
            ),
        })?;

        let data = serde_json::to_vec(snapshot).map_err(|e| StorageError::Json {
            source: e,
            context: "Failed to serialize collection".to_string(),
        })?;
        let compressed =
            zstd::encode_all(&data[..], COMPRESSION_LEVEL).map_err(|e| StorageError::Io {
                source: e,
                context: "Failed to compress collection data".to_string(),
            })?;

        let temp_path = self.temp_path();
        let mut file = fs::File::create(&temp_path).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to create temp collection file: {}", temp_path.display()),
        })?;
        file.write_all(&compressed).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to write collection: {}", temp_path.display()),
        })?;
        file.sync_all().map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to sync collection file: {}", temp_path.display()),
        })?;
        drop(file);

        let path = self.path();
        fs::rename(&temp_path, &path).map_err(|e| StorageError::Io {
            source: e,
            context: format!(
                "Failed to rename temp collection to final location: {} -> {}",
                temp_path.display(),
                path.display()
            ),
        })?;

        Ok(())
    }

    /// Remove the snapshot file if present
    pub fn delete(&self) -> Result<(), StorageError> {
        let path = self.path();
        if path.exists() {
            fs::remove_file(&path).map_err(|e| StorageError::Io {
                source: e,
                context: format!("Failed to delete collection: {}", path.display()),
            })?;
        }
        Ok(())
    }

    /// Size of the snapshot file on disk
    pub fn size(&self) -> Result<u64, StorageError> {
        let path = self.path();
        let metadata = fs::metadata(&path).map_err(|e| StorageError::Io {
            source: e,
            context: format!("Failed to get collection metadata: {}", path.display()),
        })?;
        Ok(metadata.len())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}
