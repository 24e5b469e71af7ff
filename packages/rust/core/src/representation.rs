//! Representative text for a domain, used for its embedding and for
//! naming-request snippets.

use domainscout_shared::DomainCandidate;

/// Member texts that make up a domain representation.
pub const REPRESENTATION_TOP_K: usize = 5;

/// A scored piece of evidence text.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockScore {
    pub block_id: String,
    pub score: f64,
    pub text: String,
}

/// The `k` highest-scoring blocks, keeping input order among equal scores.
pub fn select_top_k_blocks(blocks: &[BlockScore], k: usize) -> Vec<BlockScore> {
    if k == 0 {
        return Vec::new();
    }
    let mut sorted = blocks.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    sorted.truncate(k);
    sorted
}

/// Longest member texts first, up to [`REPRESENTATION_TOP_K`].
pub fn top_member_texts<'a>(members: impl IntoIterator<Item = &'a DomainCandidate>) -> Vec<String> {
    let scored: Vec<BlockScore> = members
        .into_iter()
        .map(|c| BlockScore {
            block_id: c.candidate_id.clone(),
            score: c.representative_text.chars().count() as f64,
            text: c.representative_text.clone(),
        })
        .collect();
    select_top_k_blocks(&scored, REPRESENTATION_TOP_K)
        .into_iter()
        .map(|b| b.text)
        .collect()
}

/// Newline-joined top member texts, or `display_name` when there are none.
pub fn domain_representation<'a>(
    members: impl IntoIterator<Item = &'a DomainCandidate>,
    display_name: &str,
) -> String {
    let text = top_member_texts(members).join("\n");
    let text = text.trim();
    if text.is_empty() {
        display_name.to_string()
    } else {
        text.to_string()
    }
}
