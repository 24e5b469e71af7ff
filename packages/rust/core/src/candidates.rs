//! Candidate extraction from ordered content blocks.

use domainscout_shared::{BlockType, ContentBlock, DomainCandidate};

use crate::normalize::{MARKERS, normalize_name};

/// Scan blocks in order and emit one candidate per qualifying block.
///
/// Headings always qualify. Paragraphs qualify only when they open with a
/// marker word directly followed by `:` (case-insensitive), e.g.
/// `Subsystem: Clearing`. Nothing is deduplicated here.
pub fn extract_candidates<'a>(
    blocks: impl IntoIterator<Item = &'a ContentBlock>,
) -> Vec<DomainCandidate> {
    let mut candidates = Vec::new();
    for block in blocks {
        match block.block_type {
            BlockType::Heading => {
                let name = block.text.trim();
                candidates.push(candidate(block, name, name));
            }
            BlockType::Paragraph => {
                if let Some(name) = marker_name(&block.text) {
                    candidates.push(candidate(block, name, block.text.trim()));
                }
            }
            BlockType::Other => {}
        }
    }
    candidates
}

/// Name after the first `:` of a `marker:` paragraph, if non-empty.
fn marker_name(text: &str) -> Option<&str> {
    let lowered = text.trim().to_lowercase();
    let is_marked = MARKERS
        .iter()
        .any(|marker| lowered.strip_prefix(marker).is_some_and(|rest| rest.starts_with(':')));
    if !is_marked {
        return None;
    }
    let (_, rest) = text.split_once(':')?;
    let name = rest.trim();
    (!name.is_empty()).then_some(name)
}

fn candidate(block: &ContentBlock, name: &str, representative_text: &str) -> DomainCandidate {
    DomainCandidate {
        candidate_id: block.block_id.clone(),
        candidate_name: name.to_string(),
        normalized_name: normalize_name(name),
        source_pdf_id: block.pdf_id.clone(),
        source_block_id: block.block_id.clone(),
        heading_level: block.heading_level,
        representative_text: representative_text.to_string(),
    }
}
