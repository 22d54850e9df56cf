//! Similarity cutoff and metadata filtering

use crate::retrieval::{PassageMetadata, ScoredPassage};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FilterError {
    #[error("Unknown metadata filter key: {0} (expected section, category, article_reference, file_name or chunk_id)")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Expected key=value, got '{0}'")]
    MalformedPair(String),
}

/// Drop passages scoring below `cutoff`, preserving order
pub fn filter_by_similarity(passages: Vec<ScoredPassage>, cutoff: f32) -> Vec<ScoredPassage> {
    passages.into_iter().filter(|p| p.score >= cutoff).collect()
}

/// Conjunctive exact-match filter over passage metadata.
///
/// Every field that is set must be present on the passage with an equal value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_reference: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.section.is_none()
            && self.category.is_none()
            && self.article_reference.is_none()
            && self.file_name.is_none()
            && self.chunk_id.is_none()
    }

    /// Copy of this filter with `category` set
    pub fn with_category(&self, category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..self.clone()
        }
    }

    /// Set a field by name
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), FilterError> {
        match key {
            "section" => self.section = Some(value.to_string()),
            "category" => self.category = Some(value.to_string()),
            "article_reference" => self.article_reference = Some(value.to_string()),
            "file_name" => self.file_name = Some(value.to_string()),
            "chunk_id" => {
                let id = value.parse().map_err(|_| FilterError::InvalidValue {
                    key: key.to_string(),
                    value: value.to_string(),
                })?;
                self.chunk_id = Some(id);
            }
            _ => return Err(FilterError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Build a filter from `key=value` pairs
    pub fn from_pairs<S: AsRef<str>>(pairs: &[S]) -> Result<Self, FilterError> {
        let mut filter = Self::default();
        for pair in pairs {
            let pair = pair.as_ref();
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| FilterError::MalformedPair(pair.to_string()))?;
            filter.set(key.trim(), value.trim())?;
        }
        Ok(filter)
    }

    pub fn matches(&self, metadata: &PassageMetadata) -> bool {
        field_matches(&self.section, &metadata.section)
            && field_matches(&self.category, &metadata.category)
            && field_matches(&self.article_reference, &metadata.article_reference)
            && field_matches(&self.file_name, &metadata.file_name)
            && field_matches(&self.chunk_id, &metadata.chunk_id)
    }

    /// Keep matching passages, preserving order. An empty filter is a no-op.
    pub fn apply(&self, passages: Vec<ScoredPassage>) -> Vec<ScoredPassage> {
        if self.is_empty() {
            return passages;
        }
        passages
            .into_iter()
            .filter(|p| self.matches(p.metadata()))
            .collect()
    }
}

fn field_matches<T: PartialEq>(wanted: &Option<T>, actual: &Option<T>) -> bool {
    match wanted {
        None => true,
        Some(value) => actual.as_ref() == Some(value),
    }
}
