//! Passages, scored passages and source citations

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Metadata attached to a passage at ingestion time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageMetadata {
    /// Section title of the rulebook the passage belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,

    /// Thematic category (e.g. "sanctions", "scoring")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Article reference in the official rules (e.g. "Art. 12.3")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_reference: Option<String>,

    /// Source document file name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// Position of the chunk inside its source document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_id: Option<u64>,
}

/// A retrievable unit of text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Stable unique identifier of the chunk
    pub id: String,

    /// Chunk text
    pub content: String,

    /// Ingestion metadata
    #[serde(default)]
    pub metadata: PassageMetadata,
}

impl Passage {
    pub fn new(id: impl Into<String>, content: impl Into<String>, metadata: PassageMetadata) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata,
        }
    }
}

/// What the `score` of a [`ScoredPassage`] currently measures.
///
/// The score field changes meaning as passages move through the pipeline,
/// so every stage that rewrites scores also rewrites the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// Cosine similarity in [0, 1]
    Similarity,
    /// Reciprocal Rank Fusion total (small, positive)
    Fusion,
    /// Raw cross-encoder logit (unbounded, may be negative)
    Relevance,
}

/// A passage with a stage-specific score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPassage {
    pub passage: Arc<Passage>,
    pub score: f32,
    pub kind: ScoreKind,
}

impl ScoredPassage {
    pub fn new(passage: Arc<Passage>, score: f32, kind: ScoreKind) -> Self {
        Self {
            passage,
            score,
            kind,
        }
    }

    /// Build a similarity-scored passage
    pub fn similarity(passage: Arc<Passage>, score: f32) -> Self {
        Self::new(passage, score, ScoreKind::Similarity)
    }

    pub fn id(&self) -> &str {
        &self.passage.id
    }

    pub fn content(&self) -> &str {
        &self.passage.content
    }

    pub fn metadata(&self) -> &PassageMetadata {
        &self.passage.metadata
    }

    /// Same passage, new score
    pub fn rescored(&self, score: f32, kind: ScoreKind) -> Self {
        Self::new(Arc::clone(&self.passage), score, kind)
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        let content = self.content();
        match content.char_indices().nth(max_chars) {
            Some((cut, _)) => format!("{}...", &content[..cut]),
            None => content.to_string(),
        }
    }
}

/// Sort passages by score descending. Stable, so equal scores keep their order.
///
/// NaN scores rank last.
pub fn sort_by_score_desc(passages: &mut [ScoredPassage]) {
    fn rank(score: f32) -> f32 {
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    }
    passages.sort_by(|a, b| rank(b.score).total_cmp(&rank(a.score)));
}

const NOT_AVAILABLE: &str = "N/A";
const EXCERPT_CHARS: usize = 200;

/// A citable source handed to the answer generation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    /// 1-based position in the retrieved list
    pub source_id: usize,
    pub file: String,
    pub section: String,
    pub category: String,
    pub article_ref: String,
    pub relevance_score: f32,
    pub excerpt: String,
}

impl SourceCitation {
    pub fn from_passages(passages: &[ScoredPassage]) -> Vec<Self> {
        passages
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let meta = p.metadata();
                Self {
                    source_id: i + 1,
                    file: or_not_available(&meta.file_name),
                    section: or_not_available(&meta.section),
                    category: or_not_available(&meta.category),
                    article_ref: or_not_available(&meta.article_reference),
                    relevance_score: (p.score * 1000.0).round() / 1000.0,
                    excerpt: p.preview(EXCERPT_CHARS),
                }
            })
            .collect()
    }
}

fn or_not_available(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

/// Render passages as numbered context blocks for a prompt
pub fn format_context(passages: &[ScoredPassage]) -> String {
    passages
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let section = p.metadata().section.as_deref().unwrap_or(NOT_AVAILABLE);
            format!("[Source {} - {}]\n{}\n", i + 1, section, p.content())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
