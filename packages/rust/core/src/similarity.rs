//! Cosine scoring of proposed pairs under one embedding view.

use std::collections::HashMap;

use domainscout_shared::{EmbeddingMode, SimilarityPair};

/// Cosine similarity; `0.0` when either vector has zero norm or the
/// dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    dot / denom
}

/// Score each pair with the vectors of one view.
///
/// Pairs with a missing vector on either side are dropped.
pub fn similarity_pairs_for_mode(
    pairs: &[(String, String)],
    embeddings: &HashMap<String, Vec<f32>>,
    mode: EmbeddingMode,
) -> Vec<SimilarityPair> {
    pairs
        .iter()
        .filter_map(|(a, b)| {
            let (va, vb) = (embeddings.get(a)?, embeddings.get(b)?);
            Some(SimilarityPair {
                candidate_a_id: a.clone(),
                candidate_b_id: b.clone(),
                score: cosine_similarity(va, vb),
                mode,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_basics() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 1.0], &[2.0, 2.0]) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_norm_is_zero_not_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn mismatched_dimensions_score_zero() {
        // A shared prefix would otherwise score 1.0.
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 5.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[]), 0.0);
    }

    #[test]
    fn missing_vectors_drop_the_pair() {
        let embeddings = HashMap::from([
            ("a".to_string(), vec![1.0, 0.0]),
            ("b".to_string(), vec![0.6, 0.8]),
        ]);
        let pairs = vec![
            ("a".to_string(), "b".to_string()),
            ("a".to_string(), "missing".to_string()),
        ];
        let scored = similarity_pairs_for_mode(&pairs, &embeddings, EmbeddingMode::NameOnly);
        assert_eq!(scored.len(), 1);
        assert!((scored[0].score - 0.6).abs() < 1e-6);
        assert_eq!(scored[0].mode, EmbeddingMode::NameOnly);
    }
}
