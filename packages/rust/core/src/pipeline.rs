//! End-to-end `run` pipeline: sources → candidates → embeddings → pairs →
//! merge → domains.
//!
//! Every run starts by truncating the derived region and recomputes it from
//! sources plus the curated review queue. A crash mid-run leaves derived
//! tables partial but never touches human decisions; re-running recovers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions, TryLockError};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use domainscout_shared::{
    AppConfig, DomainCandidate, DomainScoutError, EmbeddingMode, Result, ThresholdTable,
};
use domainscout_storage::{CandidateEmbedding, DomainEmbedding, Storage};
use tracing::{debug, info, instrument, warn};

use crate::blocking::generate_candidate_pairs;
use crate::candidates::extract_candidates;
use crate::embedding::Embedder;
use crate::merge::merge_candidates;
use crate::persist::{DomainPlan, persist_merge_results, plan_domains};
use crate::representation::domain_representation;
use crate::similarity::similarity_pairs_for_mode;
use crate::tokenization::{Tokenizer, prepare_texts};

// ---------------------------------------------------------------------------
// Run lock
// ---------------------------------------------------------------------------

/// Exclusive advisory lock on a file beside the database.
///
/// The OS releases the lock when the holder exits, so a killed run never
/// blocks the next one. The file itself is left in place.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Take the lock for `db_path`, failing if another run holds it.
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let path = lock_path_for(db_path);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DomainScoutError::io(parent, e))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| DomainScoutError::io(&path, e))?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(DomainScoutError::RunInProgress { lock_path: path });
            }
            Err(TryLockError::Error(e)) => return Err(DomainScoutError::io(&path, e)),
        }

        // Holder pid, informational only.
        if file.set_len(0).is_ok() {
            let _ = writeln!(file, "{}", std::process::id());
        }
        debug!(path = %path.display(), "run lock acquired");
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.path.display(), error = %e, "failed to release run lock");
        }
    }
}

/// `<db>.lock`
pub fn lock_path_for(db_path: &Path) -> PathBuf {
    let mut name = db_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

// ---------------------------------------------------------------------------
// Outcome and progress
// ---------------------------------------------------------------------------

/// Why a run stopped early without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NothingToDo {
    /// No document has content blocks.
    NoDocuments,
    /// Blocks exist but none qualified as a candidate.
    NoCandidates,
}

impl std::fmt::Display for NothingToDo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDocuments => f.write_str("no documents with content blocks"),
            Self::NoCandidates => f.write_str("no domain candidates found"),
        }
    }
}

/// Result of [`run_pipeline`].
#[derive(Debug, Clone)]
pub enum RunOutcome {
    NothingToDo(NothingToDo),
    Completed(RunSummary),
}

/// Counts for a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub documents: usize,
    pub candidates: usize,
    /// Pairs proposed by blocking.
    pub candidate_pairs: usize,
    /// Scored pairs across both modes.
    pub similarity_pairs: usize,
    pub domains: usize,
    pub review_items_added: usize,
    pub review_items_existing: usize,
    pub similarity_rows: usize,
    /// Domains whose naming was deferred to the external service.
    pub naming_requests: usize,
    pub embedding_tokens: u64,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run domain discovery over every document that has content blocks.
///
/// 1. Lock, open storage, list documents
/// 2. Clear the derived region
/// 3. Extract and store candidates
/// 4. Embed both views
/// 5. Block, score, merge (respecting rejected pairs)
/// 6. Plan and persist domains, reviews, similarity evidence
/// 7. Embed domain representations
#[instrument(skip_all, fields(db = %config.storage.db_path))]
pub async fn run_pipeline<E: Embedder>(
    config: &AppConfig,
    embedder: &E,
    progress: &dyn ProgressReporter,
) -> Result<RunOutcome> {
    let start = Instant::now();
    let thresholds = ThresholdTable::try_from(config)?;
    let min_review_threshold = thresholds
        .min_review_threshold()
        .ok_or_else(|| DomainScoutError::config("no similarity thresholds configured"))?;
    let tokenizer = Tokenizer::for_model(
        embedder.model_name(),
        config.embedding.tokenization_fallback_approx_enabled,
    )?;
    let max_tokens = config.embedding.max_tokens_per_embed;

    // --- Phase 1: Storage ---
    progress.phase("Opening storage");
    let db_path = Path::new(&config.storage.db_path);
    let _lock = RunLock::acquire(db_path)?;
    let storage = Storage::open(db_path).await?;

    let documents = storage.sources().list_documents_with_blocks().await?;
    if documents.is_empty() {
        info!("no documents with content blocks");
        return Ok(RunOutcome::NothingToDo(NothingToDo::NoDocuments));
    }

    // --- Phase 2: Reset derived state ---
    storage.derived().clear().await?;

    // --- Phase 3: Candidates ---
    progress.phase("Extracting candidates");
    let mut candidates = Vec::new();
    for doc in &documents {
        let blocks = storage.sources().list_blocks(&doc.pdf_id).await?;
        candidates.extend(extract_candidates(&blocks));
    }
    if candidates.is_empty() {
        info!(documents = documents.len(), "no candidates extracted");
        return Ok(RunOutcome::NothingToDo(NothingToDo::NoCandidates));
    }
    for candidate in &candidates {
        storage.derived().insert_candidate(candidate).await?;
    }
    info!(
        documents = documents.len(),
        candidates = candidates.len(),
        "candidates extracted"
    );

    // --- Phase 4: Candidate embeddings ---
    progress.phase("Embedding candidates");
    let mut embedding_tokens = 0u64;
    let mut vectors_by_mode: HashMap<EmbeddingMode, HashMap<String, Vec<f32>>> = HashMap::new();
    for mode in EmbeddingMode::ALL {
        let texts: Vec<String> = candidates.iter().map(|c| embedding_text(c, mode)).collect();
        let input =
            prepare_texts(&storage, &tokenizer, embedder.model_name(), &texts, max_tokens).await?;
        let batch = embedder.embed(&input).await?;
        embedding_tokens += batch.total_tokens;

        let mut by_id = HashMap::with_capacity(candidates.len());
        for (i, (candidate, vector)) in candidates.iter().zip(batch.vectors).enumerate() {
            storage
                .derived()
                .insert_candidate_embedding(&CandidateEmbedding {
                    candidate_id: candidate.candidate_id.clone(),
                    mode,
                    model_name: embedder.model_name().to_string(),
                    vector: vector.clone(),
                    token_count: batch.token_counts.get(i).copied().unwrap_or(0),
                    tokenization_mode: batch.tokenization_mode,
                })
                .await?;
            by_id.insert(candidate.candidate_id.clone(), vector);
        }
        vectors_by_mode.insert(mode, by_id);
    }

    // --- Phase 5: Pairs, similarity, merge ---
    progress.phase("Scoring candidate pairs");
    let pairs = generate_candidate_pairs(
        candidates
            .iter()
            .map(|c| (c.candidate_id.as_str(), c.normalized_name.as_str())),
        &config.blocking,
    );
    let mut similarities = Vec::new();
    for mode in EmbeddingMode::ALL {
        if let Some(vectors) = vectors_by_mode.get(&mode) {
            similarities.extend(similarity_pairs_for_mode(&pairs, vectors, mode));
        }
    }

    progress.phase("Merging candidates");
    let rejected = storage.curated().list_rejected_pairs().await?;
    let merged = merge_candidates(
        &similarities,
        &thresholds,
        &rejected,
        candidates.iter().map(|c| c.candidate_id.as_str()),
    )?;

    // --- Phase 6: Domains ---
    progress.phase("Writing domains");
    let lookup: HashMap<String, DomainCandidate> = candidates
        .iter()
        .map(|c| (c.candidate_id.clone(), c.clone()))
        .collect();
    let plans = plan_domains(
        &merged.clusters,
        &lookup,
        config.naming.preferred_display_language,
    );
    let persisted = persist_merge_results(
        &storage,
        &plans,
        &merged.review_items,
        &merged.persist_pairs,
        Utc::now(),
        min_review_threshold,
    )
    .await?;

    // --- Phase 7: Domain embeddings ---
    progress.phase("Embedding domains");
    embedding_tokens +=
        embed_domains(&storage, embedder, &tokenizer, max_tokens, &plans, &lookup).await?;

    let summary = RunSummary {
        documents: documents.len(),
        candidates: candidates.len(),
        candidate_pairs: pairs.len(),
        similarity_pairs: similarities.len(),
        domains: persisted.domains,
        review_items_added: persisted.review_items_added,
        review_items_existing: persisted.review_items_existing,
        similarity_rows: persisted.similarity_rows,
        naming_requests: plans.iter().filter(|p| p.naming_request.is_some()).count(),
        embedding_tokens,
        elapsed: start.elapsed(),
    };

    info!(
        domains = summary.domains,
        review_items = summary.review_items_added,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "run complete"
    );
    progress.done(&summary);
    Ok(RunOutcome::Completed(summary))
}

/// Text embedded for a candidate under `mode`.
pub fn embedding_text(candidate: &DomainCandidate, mode: EmbeddingMode) -> String {
    match mode {
        EmbeddingMode::NameOnly => candidate.candidate_name.clone(),
        EmbeddingMode::NamePlusSummary => format!(
            "{}\n{}",
            candidate.candidate_name, candidate.representative_text
        ),
    }
}

async fn embed_domains<E: Embedder>(
    storage: &Storage,
    embedder: &E,
    tokenizer: &Tokenizer,
    max_tokens: usize,
    plans: &[DomainPlan],
    lookup: &HashMap<String, DomainCandidate>,
) -> Result<u64> {
    let texts: Vec<String> = plans
        .iter()
        .map(|plan| {
            let members = plan.members.iter().filter_map(|id| lookup.get(id));
            domain_representation(members, &plan.display_name)
        })
        .collect();

    let input = prepare_texts(storage, tokenizer, embedder.model_name(), &texts, max_tokens).await?;
    let batch = embedder.embed(&input).await?;
    for (i, (plan, vector)) in plans.iter().zip(batch.vectors).enumerate() {
        storage
            .derived()
            .insert_domain_embedding(&DomainEmbedding {
                domain_id: plan.domain_id.clone(),
                model_name: embedder.model_name().to_string(),
                vector,
                token_count: batch.token_counts.get(i).copied().unwrap_or(0),
                tokenization_mode: batch.tokenization_mode,
            })
            .await?;
    }
    Ok(batch.total_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use domainscout_shared::{
        BlockType, ContentBlock, ReviewStatus, SourceDocument, TokenizationMode,
    };

    use crate::embedding::EmbeddingBatch;
    use crate::tokenization::PreparedTexts;
    use crate::normalize::normalize_name;
    use crate::test_support::test_db_path;

    /// Deterministic vectors keyed by the normalized first line of each text.
    struct FakeEmbedder;

    impl FakeEmbedder {
        fn vector_for(text: &str) -> Vec<f32> {
            let name = normalize_name(text.lines().next().unwrap_or(""));
            let with_summary = text.contains('\n');
            match (name.as_str(), with_summary) {
                ("payments" | "payment", _) => vec![1.0, 0.0, 0.0],
                // cos ~= 0.87 against payments: review band for name_only only.
                ("payment hub", false) => vec![0.87, 0.493, 0.0],
                ("payment hub", true) => vec![0.5, 0.866, 0.0],
                // Same name view; cos = 0.84 with summary: name_plus_summary review band.
                ("clearing" | "clearing house", false) | ("clearing", true) => vec![0.0, 1.0, 0.0],
                ("clearing house", true) => vec![0.0, 0.84, 0.5426],
                _ => vec![0.0, 0.0, 1.0],
            }
        }
    }

    impl Embedder for FakeEmbedder {
        fn model_name(&self) -> &str {
            "fake-embed"
        }

        async fn embed(&self, input: &PreparedTexts) -> Result<EmbeddingBatch> {
            Ok(EmbeddingBatch {
                vectors: input.texts.iter().map(|t| Self::vector_for(t)).collect(),
                total_tokens: input.token_counts.iter().map(|&c| u64::from(c)).sum(),
                token_counts: input.token_counts.clone(),
                tokenization_mode: input.tokenization_mode,
            })
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed(&self, _input: &PreparedTexts) -> Result<EmbeddingBatch> {
            Err(DomainScoutError::Embedding("provider down".into()))
        }
    }

    fn block(pdf: &str, idx: i64, block_type: BlockType, text: &str) -> ContentBlock {
        ContentBlock {
            block_id: format!("{pdf}_b{idx:05}"),
            pdf_id: pdf.into(),
            section_path: String::new(),
            heading_level: 1,
            block_type,
            text: text.into(),
            page_index: 0,
            position_index: idx,
        }
    }

    async fn seed(config: &AppConfig, docs: Vec<(&str, Vec<ContentBlock>)>) {
        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        for (pdf_id, blocks) in docs {
            storage
                .sources()
                .insert_document(&SourceDocument {
                    pdf_id: pdf_id.into(),
                    file_path: format!("/docs/{pdf_id}.pdf"),
                    checksum: format!("sum-{pdf_id}"),
                    ingested_at: Utc::now(),
                })
                .await
                .unwrap();
            storage.sources().insert_blocks(&blocks).await.unwrap();
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.db_path = test_db_path().to_string_lossy().into_owned();
        config
    }

    async fn seeded_config() -> AppConfig {
        let config = test_config();
        seed(
            &config,
            vec![
                (
                    "p1",
                    vec![
                        block("p1", 0, BlockType::Heading, "Payments"),
                        block("p1", 1, BlockType::Paragraph, "Domain: Payment"),
                        block("p1", 2, BlockType::Heading, "Risk Engine"),
                        block("p1", 3, BlockType::Paragraph, "plain prose, not a candidate"),
                    ],
                ),
                (
                    "p2",
                    vec![
                        block("p2", 0, BlockType::Heading, "Payments"),
                        block("p2", 1, BlockType::Heading, "Overview"),
                        block("p2", 2, BlockType::Heading, "Payment Hub"),
                    ],
                ),
            ],
        )
        .await;
        config
    }

    fn completed(outcome: RunOutcome) -> RunSummary {
        match outcome {
            RunOutcome::Completed(summary) => summary,
            RunOutcome::NothingToDo(reason) => panic!("expected a completed run, got {reason}"),
        }
    }

    #[tokio::test]
    async fn full_run_clusters_and_queues_reviews() {
        let config = seeded_config().await;
        let summary = completed(
            run_pipeline(&config, &FakeEmbedder, &SilentProgress)
                .await
                .unwrap(),
        );

        assert_eq!(summary.documents, 2);
        assert_eq!(summary.candidates, 6);
        assert_eq!(summary.domains, 4);
        // payment hub sits in the name_only review band with each payments member.
        assert_eq!(summary.review_items_added, 3);
        assert!(summary.embedding_tokens > 0);

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let domains = storage.derived().list_domains().await.unwrap();
        let names: Vec<(&str, &str)> = domains
            .iter()
            .map(|d| (d.domain_id.as_str(), d.display_name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("domain_001", "Payments"),
                ("domain_002", "Risk Engine"),
                ("domain_003", "Overview"),
                ("domain_004", "Payment Hub"),
            ]
        );
        assert_eq!(storage.derived().list_domain_embeddings().await.unwrap().len(), 4);
        let embeddings = storage
            .derived()
            .list_candidate_embeddings(EmbeddingMode::NamePlusSummary)
            .await
            .unwrap();
        assert_eq!(embeddings.len(), 6);
        // Unknown model names count with cl100k_base, not the estimate.
        assert!(
            embeddings
                .iter()
                .all(|e| e.tokenization_mode == TokenizationMode::Exact && e.token_count > 0)
        );
        // Released after the run.
        drop(RunLock::acquire(Path::new(&config.storage.db_path)).unwrap());
    }

    #[tokio::test]
    async fn rerun_is_idempotent_and_keeps_reviews() {
        let config = seeded_config().await;
        completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let first_domains = storage.derived().list_domains().await.unwrap();
        drop(storage);

        let second = completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        assert_eq!(second.review_items_added, 0);
        assert_eq!(second.review_items_existing, 3);

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let second_domains = storage.derived().list_domains().await.unwrap();
        let ids = |ds: &[domainscout_shared::Domain]| {
            ds.iter()
                .map(|d| (d.domain_id.clone(), d.display_name.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(&first_domains), ids(&second_domains));
        assert_eq!(storage.curated().list_reviews(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejected_review_pair_is_skipped_on_rerun() {
        let config = seeded_config().await;
        completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let pending = storage.curated().list_pending_reviews().await.unwrap();
        storage
            .curated()
            .resolve_review(&pending[0].review_id, ReviewStatus::Rejected, Utc::now())
            .await
            .unwrap();
        drop(storage);

        let second = completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        assert_eq!(second.review_items_existing, 2);
        assert_eq!(second.review_items_added, 0);
        assert_eq!(second.domains, 4);
    }

    #[tokio::test]
    async fn rejecting_a_merged_pair_splits_it_on_rerun() {
        let config = test_config();
        seed(
            &config,
            vec![(
                "p3",
                vec![
                    block("p3", 0, BlockType::Heading, "Clearing"),
                    block("p3", 1, BlockType::Heading, "Clearing House"),
                ],
            )],
        )
        .await;

        let first = completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        assert_eq!(first.domains, 1);
        assert_eq!(first.review_items_added, 1);

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let pending = storage.curated().list_pending_reviews().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, "name_plus_summary_review_band");
        storage
            .curated()
            .resolve_review(&pending[0].review_id, ReviewStatus::Rejected, Utc::now())
            .await
            .unwrap();
        drop(storage);

        let second = completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        assert_eq!(second.domains, 2);
        assert_eq!(second.review_items_added, 0);

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        let names: Vec<String> = storage
            .derived()
            .list_domains()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.display_name)
            .collect();
        assert_eq!(names, vec!["Clearing", "Clearing House"]);
    }

    #[tokio::test]
    async fn nothing_to_do_signals() {
        let empty = test_config();
        let outcome = run_pipeline(&empty, &FakeEmbedder, &SilentProgress).await.unwrap();
        assert!(matches!(outcome, RunOutcome::NothingToDo(NothingToDo::NoDocuments)));

        let no_candidates = test_config();
        seed(
            &no_candidates,
            vec![("p1", vec![block("p1", 0, BlockType::Paragraph, "just prose")])],
        )
        .await;
        let outcome = run_pipeline(&no_candidates, &FakeEmbedder, &SilentProgress)
            .await
            .unwrap();
        assert!(matches!(outcome, RunOutcome::NothingToDo(NothingToDo::NoCandidates)));
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let config = seeded_config().await;
        let held = RunLock::acquire(Path::new(&config.storage.db_path)).unwrap();

        let err = run_pipeline(&config, &FakeEmbedder, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainScoutError::RunInProgress { .. }));

        drop(held);
        assert!(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.is_ok());
    }

    #[tokio::test]
    async fn leftover_lock_file_does_not_block_a_run() {
        let config = seeded_config().await;
        let db_path = Path::new(&config.storage.db_path);
        // What a killed run leaves behind: the file, but no held lock.
        std::fs::write(lock_path_for(db_path), "999999\n").unwrap();

        let summary = completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());
        assert_eq!(summary.domains, 4);
    }

    #[tokio::test]
    async fn invalid_thresholds_fail_before_any_write() {
        let mut config = seeded_config().await;
        config.thresholds.review_name_only = 0.95;

        let err = run_pipeline(&config, &FakeEmbedder, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainScoutError::Config { .. }));
    }

    #[tokio::test]
    async fn embedding_failure_leaves_reviews_intact() {
        let config = seeded_config().await;
        completed(run_pipeline(&config, &FakeEmbedder, &SilentProgress).await.unwrap());

        let err = run_pipeline(&config, &FailingEmbedder, &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainScoutError::Embedding(_)));

        let storage = Storage::open(Path::new(&config.storage.db_path)).await.unwrap();
        assert!(storage.derived().list_domains().await.unwrap().is_empty());
        assert_eq!(storage.curated().list_reviews(None).await.unwrap().len(), 3);
    }

    #[test]
    fn lock_path_sits_beside_db() {
        assert_eq!(
            lock_path_for(Path::new("/tmp/data/ds.db")),
            PathBuf::from("/tmp/data/ds.db.lock")
        );
    }
}
