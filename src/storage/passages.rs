//! Loading pre-chunked passages produced by the ingestion pipeline
//!
//! Input is JSON Lines, one passage per line:
//! `{"id": "...", "content": "...", "metadata": {"section": "...", ...}}`.
//! The `id` is optional and derived from the content when absent.

use crate::retrieval::{Passage, PassageMetadata};
use crate::storage::StorageError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct PassageRecord {
    #[serde(default)]
    id: Option<String>,
    content: String,
    #[serde(default)]
    metadata: PassageMetadata,
}

/// Stable chunk id from source file name, chunk position and content (BLAKE3)
pub fn derive_passage_id(metadata: &PassageMetadata, content: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(metadata.file_name.as_deref().unwrap_or_default().as_bytes());
    hasher.update(&[0]);
    if let Some(chunk_id) = metadata.chunk_id {
        hasher.update(&chunk_id.to_le_bytes());
    }
    hasher.update(&[0]);
    hasher.update(content.as_bytes());
    // 32 hex characters (16 bytes) for reasonable uniqueness
    hasher.finalize().to_hex()[..32].to_string()
}

/// Parse passages from JSON Lines text. Blank lines and blank contents are skipped.
pub fn parse_passages(input: &str) -> Result<Vec<Passage>, StorageError> {
    let mut passages = Vec::new();

    for (line_no, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record: PassageRecord = serde_json::from_str(line).map_err(|e| StorageError::Json {
            source: e,
            context: format!("Invalid passage on line {}", line_no + 1),
        })?;

        if record.content.trim().is_empty() {
            warn!("Skipping empty passage on line {}", line_no + 1);
            continue;
        }

        let id = match record.id {
            Some(id) if !id.is_empty() => id,
            _ => derive_passage_id(&record.metadata, &record.content),
        };
        passages.push(Passage::new(id, record.content, record.metadata));
    }

    Ok(passages)
}

/// Load passages from a JSON Lines file
pub fn load_passages(path: &Path) -> Result<Vec<Passage>, StorageError> {
    let content = fs::read_to_string(path).map_err(|e| StorageError::Io {
        source: e,
        context: format!("Failed to read passages file: {}", path.display()),
    })?;

    let passages = parse_passages(&content)?;
    info!("Loaded {} passages from {}", passages.len(), path.display());
    Ok(passages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_passages() {
        let input = r#"
{"id": "art-12", "content": "Les coups à la nuque sont interdits.", "metadata": {"category": "sanctions", "article_reference": "Art. 12"}}

{"content": "Un ippon met fin au combat.", "metadata": {"file_name": "reglement.pdf", "chunk_id": 4}}
{"content": "   "}
"#;
        let passages = parse_passages(input).unwrap();

        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].id, "art-12");
        assert_eq!(passages[0].metadata.category.as_deref(), Some("sanctions"));
        assert_eq!(passages[1].id.len(), 32);
        assert_eq!(passages[1].metadata.chunk_id, Some(4));
    }

    #[test]
    fn test_derived_ids_are_stable_and_distinct() {
        let meta = PassageMetadata {
            file_name: Some("reglement.pdf".to_string()),
            chunk_id: Some(1),
            ..Default::default()
        };
        let other = PassageMetadata {
            chunk_id: Some(2),
            ..meta.clone()
        };

        assert_eq!(derive_passage_id(&meta, "texte"), derive_passage_id(&meta, "texte"));
        assert_ne!(derive_passage_id(&meta, "texte"), derive_passage_id(&other, "texte"));
    }

    #[test]
    fn test_invalid_line_reports_position() {
        let err = parse_passages("{\"content\": \"ok ok ok\"}\nnot json").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }
}
