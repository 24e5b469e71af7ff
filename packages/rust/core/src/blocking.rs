//! Pair generation by prefix bucket and length window.
//!
//! Two names are compared only when they share the first `prefix_len`
//! characters and their lengths differ by at most `length_window`. Duplicates
//! whose normalized names diverge within the prefix are never compared.

use std::collections::BTreeMap;

use domainscout_shared::BlockingConfig;

/// Propose candidate pairs worth scoring.
///
/// `names` yields `(candidate_id, normalized_name)`. Buckets are visited in
/// key order and members keep their input order among equal lengths, so the
/// output is deterministic for a given input.
pub fn generate_candidate_pairs<'a>(
    names: impl IntoIterator<Item = (&'a str, &'a str)>,
    opts: &BlockingConfig,
) -> Vec<(String, String)> {
    let mut buckets: BTreeMap<String, Vec<(&'a str, usize)>> = BTreeMap::new();
    for (id, name) in names {
        let key: String = name.chars().take(opts.prefix_len).collect();
        buckets
            .entry(key)
            .or_default()
            .push((id, name.chars().count()));
    }

    let mut pairs = Vec::new();
    for items in buckets.values_mut() {
        items.sort_by_key(|&(_, len)| len);
        for (i, &(a_id, a_len)) in items.iter().enumerate() {
            for &(b_id, b_len) in &items[i + 1..] {
                // Sorted by length: every later item is at least as far away.
                if b_len - a_len > opts.length_window {
                    break;
                }
                pairs.push((a_id.to_string(), b_id.to_string()));
            }
        }
    }

    tracing::debug!(
        buckets = buckets.len(),
        pairs = pairs.len(),
        "generated candidate pairs"
    );
    pairs
}
