//! Threshold-banded merge engine.
//!
//! Every scored pair is checked against the human rejection set, then against
//! its mode's `(merge, review)` thresholds:
//!
//! | score                     | union | review item | kept for audit |
//! |---------------------------|-------|-------------|----------------|
//! | `>= merge`                | yes   | no          | yes            |
//! | `[review, merge)`         | no    | yes         | yes            |
//! | `< review`                | no    | no          | no             |
//!
//! Rejected pairs are skipped in either order and under every mode.

use std::collections::{BTreeSet, HashMap, HashSet};

use domainscout_shared::{ModeThresholds, Result, SimilarityPair, ThresholdTable};
use tracing::debug;

// ---------------------------------------------------------------------------
// Union-find
// ---------------------------------------------------------------------------

/// Disjoint sets over string ids, stored as dense indices.
#[derive(Debug, Default)]
pub struct UnionFind {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    parent: Vec<usize>,
}

impl UnionFind {
    /// Start with every item in its own set.
    pub fn new<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut uf = Self::default();
        for item in items {
            uf.insert(item.into());
        }
        uf
    }

    fn insert(&mut self, id: String) -> usize {
        if let Some(&idx) = self.index.get(&id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.clone(), idx);
        self.ids.push(id);
        self.parent.push(idx);
        idx
    }

    fn root(&mut self, mut idx: usize) -> usize {
        let mut root = idx;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Second pass: point the whole chain at the root.
        while self.parent[idx] != root {
            let next = self.parent[idx];
            self.parent[idx] = root;
            idx = next;
        }
        root
    }

    /// Representative id of the set containing `id`, or `None` if unknown.
    pub fn find(&mut self, id: &str) -> Option<&str> {
        let idx = *self.index.get(id)?;
        let root = self.root(idx);
        Some(self.ids[root].as_str())
    }

    /// Join the sets of `a` and `b`, adding either if unseen.
    pub fn union(&mut self, a: &str, b: &str) {
        let a = self.insert(a.to_string());
        let b = self.insert(b.to_string());
        let (root_a, root_b) = (self.root(a), self.root(b));
        if root_a != root_b {
            self.parent[root_b] = root_a;
        }
    }

    /// Current partition, ordered by each set's smallest member.
    pub fn clusters(&mut self) -> Vec<BTreeSet<String>> {
        let mut by_root: HashMap<usize, BTreeSet<String>> = HashMap::new();
        for idx in 0..self.ids.len() {
            let root = self.root(idx);
            by_root
                .entry(root)
                .or_default()
                .insert(self.ids[idx].clone());
        }
        let mut clusters: Vec<BTreeSet<String>> = by_root.into_values().collect();
        clusters.sort_by(|a, b| a.first().cmp(&b.first()));
        clusters
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// A pair that landed in its mode's review band.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewCandidate {
    pub candidate_a_id: String,
    pub candidate_b_id: String,
    pub similarity: f64,
    /// `"{mode}_review_band"`.
    pub reason: String,
}

/// Output of [`merge_candidates`].
#[derive(Debug, Clone, Default)]
pub struct MergeResult {
    /// Partition of the candidate universe, ordered by smallest member.
    pub clusters: Vec<BTreeSet<String>>,
    pub review_items: Vec<ReviewCandidate>,
    /// Pairs at or above their mode's review threshold.
    pub persist_pairs: Vec<SimilarityPair>,
}

/// Cluster candidates from scored pairs.
///
/// `items` is the full candidate universe; ids that only appear in
/// `similarities` are added to it. Every mode present in `similarities` must
/// have thresholds: a missing one fails before any pair is processed.
pub fn merge_candidates<'a>(
    similarities: &[SimilarityPair],
    thresholds: &ThresholdTable,
    rejected_pairs: &HashSet<(String, String)>,
    items: impl IntoIterator<Item = &'a str>,
) -> Result<MergeResult> {
    let mut by_mode = HashMap::new();
    for pair in similarities {
        if !by_mode.contains_key(&pair.mode) {
            by_mode.insert(pair.mode, thresholds.get(pair.mode)?);
        }
    }

    let rejected: HashSet<(&str, &str)> = rejected_pairs
        .iter()
        .flat_map(|(a, b)| [(a.as_str(), b.as_str()), (b.as_str(), a.as_str())])
        .collect();

    let mut universe: BTreeSet<&str> = items.into_iter().collect();
    for pair in similarities {
        universe.insert(pair.candidate_a_id.as_str());
        universe.insert(pair.candidate_b_id.as_str());
    }
    let mut union_find = UnionFind::new(universe);

    let mut result = MergeResult::default();
    let mut skipped = 0usize;
    for pair in similarities {
        let (a, b) = (pair.candidate_a_id.as_str(), pair.candidate_b_id.as_str());
        if rejected.contains(&(a, b)) {
            skipped += 1;
            continue;
        }

        let ModeThresholds { merge, review } = by_mode[&pair.mode];
        if pair.score >= review {
            result.persist_pairs.push(pair.clone());
        }
        if pair.score >= merge {
            union_find.union(a, b);
        } else if pair.score >= review {
            result.review_items.push(ReviewCandidate {
                candidate_a_id: a.to_string(),
                candidate_b_id: b.to_string(),
                similarity: pair.score,
                reason: format!("{}_review_band", pair.mode),
            });
        }
    }

    result.clusters = union_find.clusters();
    debug!(
        pairs = similarities.len(),
        rejected_skipped = skipped,
        clusters = result.clusters.len(),
        review_items = result.review_items.len(),
        "merge complete"
    );
    Ok(result)
}
