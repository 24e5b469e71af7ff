//! Persistence coordinator: turns a merge result into derived rows and new
//! review items without touching existing human decisions.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use domainscout_shared::{
    AliasInfo, Domain, DomainCandidate, DomainScoutError, PreferredLanguage, Result, ReviewItem,
    ReviewStatus, SimilarityPair,
};
use domainscout_storage::Storage;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument};

use crate::merge::ReviewCandidate;
use crate::naming::{FallbackAwareNaming, LlmNamingRequest, NamingStrategy};
use crate::representation::top_member_texts;

/// One cluster, numbered and named, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainPlan {
    /// `domain_001`, `domain_002`, ...
    pub domain_id: String,
    pub display_name: String,
    /// Every cluster member, sorted.
    pub members: Vec<String>,
    /// One per member that has a known candidate.
    pub aliases: Vec<AliasInfo>,
    /// Source blocks of the known members.
    pub block_ids: Vec<String>,
    /// Distinct source documents, in member order.
    pub source_pdfs: Vec<String>,
    /// Set when the aliases should be named by the external service.
    pub naming_request: Option<LlmNamingRequest>,
}

/// Number and name clusters.
///
/// Clusters are ordered by their smallest member id and numbered from 1, so
/// an unchanged partition always gets the same domain ids. Member ids with no
/// entry in `candidates` stay in `members` but contribute no alias or source.
pub fn plan_domains(
    clusters: &[BTreeSet<String>],
    candidates: &HashMap<String, DomainCandidate>,
    language: PreferredLanguage,
) -> Vec<DomainPlan> {
    let mut ordered: Vec<&BTreeSet<String>> = clusters.iter().filter(|c| !c.is_empty()).collect();
    ordered.sort_by(|a, b| a.first().cmp(&b.first()));

    let naming = FallbackAwareNaming { language };
    ordered
        .into_iter()
        .enumerate()
        .map(|(idx, cluster)| {
            let known: Vec<&DomainCandidate> =
                cluster.iter().filter_map(|id| candidates.get(id)).collect();

            let aliases: Vec<AliasInfo> = known
                .iter()
                .map(|c| AliasInfo::new(&c.candidate_name, &c.source_pdf_id, c.heading_level))
                .collect();

            let mut source_pdfs: Vec<String> = Vec::new();
            for c in &known {
                if !source_pdfs.contains(&c.source_pdf_id) {
                    source_pdfs.push(c.source_pdf_id.clone());
                }
            }

            let snippets = top_member_texts(known.iter().copied());
            let decision = naming.name_cluster(&aliases, &snippets);

            DomainPlan {
                domain_id: format!("domain_{:03}", idx + 1),
                display_name: decision.display_name().to_string(),
                members: cluster.iter().cloned().collect(),
                aliases,
                block_ids: known.iter().map(|c| c.source_block_id.clone()).collect(),
                source_pdfs,
                naming_request: decision.into_request(),
            }
        })
        .collect()
}

/// Stable review id for an ordered pair.
pub fn review_id(a: &str, b: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(format!("{a}|{b}").as_bytes()));
    format!("review_{}", &digest[..10])
}

/// Keep rows at or above the global storage floor.
pub fn filter_similarity_rows(pairs: &[SimilarityPair], min_review_threshold: f64) -> Vec<SimilarityPair> {
    pairs
        .iter()
        .filter(|p| p.score >= min_review_threshold)
        .cloned()
        .collect()
}

/// Counts from [`persist_merge_results`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistSummary {
    pub domains: usize,
    pub aliases: usize,
    pub review_items_added: usize,
    pub review_items_existing: usize,
    pub similarity_rows: usize,
}

/// Write domains and their mappings, queue new review items, and store
/// similarity evidence.
///
/// Review items whose unordered pair already has a row (in any status) are
/// left alone. Each write commits on its own.
#[instrument(skip_all, fields(domains = plans.len(), review_items = review_items.len()))]
pub async fn persist_merge_results(
    storage: &Storage,
    plans: &[DomainPlan],
    review_items: &[ReviewCandidate],
    persist_pairs: &[SimilarityPair],
    created_at: DateTime<Utc>,
    min_review_threshold: f64,
) -> Result<PersistSummary> {
    let mut summary = PersistSummary::default();
    let derived = storage.derived();

    // --- Domains ---
    for plan in plans {
        derived
            .insert_domain(&Domain {
                domain_id: plan.domain_id.clone(),
                display_name: plan.display_name.clone(),
                created_at,
            })
            .await?;
        for alias in &plan.aliases {
            derived.insert_domain_alias(&plan.domain_id, alias).await?;
        }
        for block_id in &plan.block_ids {
            derived.insert_block_domain_map(block_id, &plan.domain_id).await?;
        }
        for pdf_id in &plan.source_pdfs {
            derived.insert_domain_source(&plan.domain_id, pdf_id).await?;
        }
        summary.domains += 1;
        summary.aliases += plan.aliases.len();
    }

    // --- Review queue ---
    let curated = storage.curated();
    for item in review_items {
        if curated
            .has_review_pair(&item.candidate_a_id, &item.candidate_b_id)
            .await?
        {
            summary.review_items_existing += 1;
            continue;
        }
        curated
            .insert_review_item(&ReviewItem {
                review_id: review_id(&item.candidate_a_id, &item.candidate_b_id),
                candidate_a_id: item.candidate_a_id.clone(),
                candidate_b_id: item.candidate_b_id.clone(),
                similarity: item.similarity,
                reason: item.reason.clone(),
                status: ReviewStatus::Pending,
                created_at,
                resolved_at: None,
            })
            .await?;
        summary.review_items_added += 1;
    }

    // --- Similarity evidence ---
    let filtered = filter_similarity_rows(persist_pairs, min_review_threshold);
    if !filtered.is_empty() {
        summary.similarity_rows = derived.insert_similarity_pairs(&filtered).await?;
    }

    info!(
        domains = summary.domains,
        review_added = summary.review_items_added,
        review_existing = summary.review_items_existing,
        similarity_rows = summary.similarity_rows,
        "merge results persisted"
    );
    Ok(summary)
}

/// Rebuild domain plans from the last run's stored candidates and mappings.
///
/// Domain ids and display names are the stored ones; naming requests are
/// rebuilt for `language`. Fails if a mapped block has no stored candidate.
pub async fn load_domain_plans(
    storage: &Storage,
    language: PreferredLanguage,
) -> Result<Vec<DomainPlan>> {
    let derived = storage.derived();
    let candidates: HashMap<String, DomainCandidate> = derived
        .list_candidates()
        .await?
        .into_iter()
        .map(|c| (c.candidate_id.clone(), c))
        .collect();
    let stored_names: HashMap<String, String> = derived
        .list_domains()
        .await?
        .into_iter()
        .map(|d| (d.domain_id, d.display_name))
        .collect();

    let mut block_domains: HashMap<String, String> = HashMap::new();
    let mut clusters: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (block_id, domain_id) in derived.list_block_domain_map().await? {
        if !candidates.contains_key(&block_id) {
            return Err(DomainScoutError::validation(format!(
                "{domain_id} maps block {block_id}, which has no stored candidate; re-run to rebuild"
            )));
        }
        clusters.entry(domain_id.clone()).or_default().insert(block_id.clone());
        block_domains.insert(block_id, domain_id);
    }
    debug!(clusters = clusters.len(), "loaded stored clusters");

    let clusters: Vec<BTreeSet<String>> = clusters.into_values().collect();
    let mut plans = plan_domains(&clusters, &candidates, language);
    for plan in &mut plans {
        let Some(domain_id) = plan.members.first().and_then(|m| block_domains.get(m)) else {
            continue;
        };
        plan.domain_id = domain_id.clone();
        if let Some(name) = stored_names.get(domain_id) {
            plan.display_name = name.clone();
        }
    }
    Ok(plans)
}
