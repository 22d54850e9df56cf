//! Confidence estimation over a final passage list

use crate::retrieval::{ScoreKind, ScoredPassage};

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Reduce a passage list to a single confidence value in [0, 1].
///
/// Cross-encoder logits are unbounded, so when any passage carries a
/// [`ScoreKind::Relevance`] score every score goes through a logistic sigmoid
/// before averaging. Similarity and fusion scores are already non-negative
/// and are averaged directly. Empty input yields 0.0.
pub fn estimate_confidence(passages: &[ScoredPassage]) -> f32 {
    if passages.is_empty() {
        return 0.0;
    }

    let reranked = passages.iter().any(|p| p.kind == ScoreKind::Relevance);

    let total: f32 = if reranked {
        passages.iter().map(|p| sigmoid(p.score)).sum()
    } else {
        passages.iter().map(|p| p.score).sum()
    };
    let avg = total / passages.len() as f32;

    if avg.is_nan() {
        return 0.0;
    }
    avg.clamp(0.0, 1.0)
}
