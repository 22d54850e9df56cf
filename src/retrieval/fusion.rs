//! Reciprocal Rank Fusion algorithm for combining per-variant result lists

use crate::retrieval::{sort_by_score_desc, ScoreKind, ScoredPassage};
use ahash::AHashMap;
use thiserror::Error;

/// Default RRF K constant
pub const DEFAULT_RRF_K: f32 = 60.0;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid RRF constant: k must be finite and non-negative, got {0}")]
    InvalidK(f32),
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (typically 60)
    pub rrf_k: f32,
}

impl FusionConfig {
    pub fn new(rrf_k: f32) -> Result<Self, FusionError> {
        if !rrf_k.is_finite() || rrf_k < 0.0 {
            return Err(FusionError::InvalidK(rrf_k));
        }

        Ok(Self { rrf_k })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: DEFAULT_RRF_K,
        }
    }
}

/// Apply Reciprocal Rank Fusion to any number of ranked lists
///
/// RRF formula: score(id) = sum over all lists of: 1 / (k + rank), rank 1-based
///
/// Only rank positions matter, so lists whose raw scores live on different
/// scales can be merged without normalization. Each id appears once in the
/// output and keeps the passage seen first. Ties are broken by first-seen
/// order across the concatenated input lists.
///
/// # Returns
/// Fused passages tagged [`ScoreKind::Fusion`], sorted by score descending
pub fn reciprocal_rank_fusion(
    lists: &[Vec<ScoredPassage>],
    config: &FusionConfig,
) -> Vec<ScoredPassage> {
    let k = f64::from(config.rrf_k);

    // Position in `fused` per id; `fused` stays in first-seen order
    let mut positions: AHashMap<&str, usize> = AHashMap::new();
    let mut fused: Vec<(&ScoredPassage, f64)> = Vec::new();

    for list in lists {
        for (rank, passage) in list.iter().enumerate() {
            let contribution = 1.0 / (k + rank as f64 + 1.0);
            match positions.get(passage.id()) {
                Some(&pos) => fused[pos].1 += contribution,
                None => {
                    positions.insert(passage.id(), fused.len());
                    fused.push((passage, contribution));
                }
            }
        }
    }

    let mut results: Vec<ScoredPassage> = fused
        .into_iter()
        .map(|(passage, score)| passage.rescored(score as f32, ScoreKind::Fusion))
        .collect();
    sort_by_score_desc(&mut results);

    tracing::debug!(
        "RRF: fused {} lists into {} unique passages",
        lists.len(),
        results.len()
    );

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Passage, PassageMetadata};
    use std::sync::Arc;

    fn list(ids: &[&str]) -> Vec<ScoredPassage> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let passage = Passage::new(*id, format!("contenu {}", id), PassageMetadata::default());
                ScoredPassage::similarity(Arc::new(passage), 0.9 - i as f32 * 0.1)
            })
            .collect()
    }

    fn score_of(fused: &[ScoredPassage], id: &str) -> f32 {
        fused.iter().find(|p| p.id() == id).map(|p| p.score).unwrap()
    }

    #[test]
    fn test_rrf_symmetric_lists_tie() {
        let config = FusionConfig::default();
        let fused = reciprocal_rank_fusion(&[list(&["A", "B"]), list(&["B", "A"])], &config);

        let expected = (1.0f64 / 61.0 + 1.0 / 62.0) as f32;
        assert_eq!(fused.len(), 2);
        assert!((score_of(&fused, "A") - expected).abs() < 1e-7);
        assert_eq!(score_of(&fused, "A"), score_of(&fused, "B"));

        // Tie broken by first-seen order
        assert_eq!(fused[0].id(), "A");
        assert_eq!(fused[1].id(), "B");

        let swapped = reciprocal_rank_fusion(&[list(&["B", "A"]), list(&["A", "B"])], &config);
        assert_eq!(swapped[0].id(), "B");
        assert_eq!(score_of(&swapped, "A"), score_of(&fused, "A"));
    }

    #[test]
    fn test_rrf_scores_independent_of_list_order() {
        let config = FusionConfig::default();
        let a = list(&["1", "2", "3"]);
        let b = list(&["2", "4"]);
        let c = list(&["3", "1", "4", "5"]);

        let forward = reciprocal_rank_fusion(&[a.clone(), b.clone(), c.clone()], &config);
        let backward = reciprocal_rank_fusion(&[c, b, a], &config);

        for passage in &forward {
            assert!((passage.score - score_of(&backward, passage.id())).abs() < 1e-7);
        }
        assert_eq!(forward.len(), 5);
        assert_eq!(forward.last().unwrap().id(), "5");
    }

    #[test]
    fn test_rrf_dedup_sums_contributions() {
        let config = FusionConfig::default();
        let lists = vec![list(&["X", "Y"]), list(&["Z", "X"]), list(&["X"])];
        let fused = reciprocal_rank_fusion(&lists, &config);

        let x_count = fused.iter().filter(|p| p.id() == "X").count();
        assert_eq!(x_count, 1);

        let expected = (1.0f64 / 61.0 + 1.0 / 62.0 + 1.0 / 61.0) as f32;
        assert!((score_of(&fused, "X") - expected).abs() < 1e-7);
        assert_eq!(fused[0].id(), "X");
        assert!(fused.iter().all(|p| p.kind == ScoreKind::Fusion));
    }

    #[test]
    fn test_rrf_keeps_first_seen_passage() {
        let config = FusionConfig::default();
        let first = list(&["X"]);
        let mut second = list(&["X"]);
        second[0] = ScoredPassage::similarity(
            Arc::new(Passage::new("X", "autre contenu", PassageMetadata::default())),
            0.5,
        );

        let fused = reciprocal_rank_fusion(&[first, second], &config);
        assert_eq!(fused[0].content(), "contenu X");
    }

    #[test]
    fn test_rrf_single_and_empty() {
        let config = FusionConfig::default();
        assert!(reciprocal_rank_fusion(&[], &config).is_empty());

        let fused = reciprocal_rank_fusion(&[list(&["a", "b", "c"])], &config);
        let ids: Vec<&str> = fused.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-7);
    }

    #[test]
    fn test_invalid_k() {
        assert!(FusionConfig::new(-1.0).is_err());
        assert!(FusionConfig::new(f32::NAN).is_err());
        assert!(FusionConfig::new(0.0).is_ok());
    }
}
