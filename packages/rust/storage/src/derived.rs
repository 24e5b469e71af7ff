//! Derived region: state a pipeline run computes from sources + curated
//! decisions. [`DerivedRepo::clear`] truncates all of it at the start of a run.

use domainscout_shared::{
    AliasInfo, Domain, DomainCandidate, DomainScoutError, EmbeddingMode, Result, SimilarityPair,
    TokenizationMode,
};
use libsql::params;

use crate::{Storage, db_err, parse_timestamp};

/// Tables owned by the derived region, cleared in dependency order.
const DERIVED_TABLES: &[&str] = &[
    "candidate_embeddings",
    "candidate_similarity",
    "domain_embeddings",
    "block_domain_map",
    "domain_aliases",
    "domain_sources",
    "domains",
    "domain_candidates",
];

/// One stored embedding of a candidate under a given view.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateEmbedding {
    pub candidate_id: String,
    pub mode: EmbeddingMode,
    pub model_name: String,
    pub vector: Vec<f32>,
    pub token_count: u32,
    pub tokenization_mode: TokenizationMode,
}

/// Embedding of a domain's representation text.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEmbedding {
    pub domain_id: String,
    pub model_name: String,
    pub vector: Vec<f32>,
    pub token_count: u32,
    pub tokenization_mode: TokenizationMode,
}

/// Serialize a vector as a JSON array.
pub fn serialize_vector(vector: &[f32]) -> String {
    serde_json::to_string(vector).unwrap_or_else(|_| "[]".to_string())
}

/// Parse a stored JSON vector. Anything other than an array of numbers is an error.
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    serde_json::from_str::<Vec<f32>>(text)
        .map_err(|e| DomainScoutError::validation(format!("malformed vector: {e}")))
}

/// Repository over the recomputable tables.
pub struct DerivedRepo<'a> {
    storage: &'a Storage,
}

impl<'a> DerivedRepo<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Truncate every derived table. The review queue is not touched.
    pub async fn clear(&self) -> Result<()> {
        self.storage.check_writable()?;
        let sql: String = DERIVED_TABLES
            .iter()
            .map(|t| format!("DELETE FROM {t};\n"))
            .collect();
        self.storage
            .conn
            .execute_batch(&sql)
            .await
            .map_err(db_err)?;
        tracing::debug!(tables = DERIVED_TABLES.len(), "cleared derived tables");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Candidates
    // -----------------------------------------------------------------------

    pub async fn insert_candidate(&self, candidate: &DomainCandidate) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT INTO domain_candidates
                   (candidate_id, candidate_name, normalized_name, source_pdf_id, source_block_id, heading_level, representative_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    candidate.candidate_id.as_str(),
                    candidate.candidate_name.as_str(),
                    candidate.normalized_name.as_str(),
                    candidate.source_pdf_id.as_str(),
                    candidate.source_block_id.as_str(),
                    candidate.heading_level,
                    candidate.representative_text.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_candidates(&self) -> Result<Vec<DomainCandidate>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT candidate_id, candidate_name, normalized_name, source_pdf_id,
                        source_block_id, heading_level, representative_text
                 FROM domain_candidates ORDER BY candidate_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(DomainCandidate {
                candidate_id: row.get(0).map_err(db_err)?,
                candidate_name: row.get(1).map_err(db_err)?,
                normalized_name: row.get(2).map_err(db_err)?,
                source_pdf_id: row.get(3).map_err(db_err)?,
                source_block_id: row.get(4).map_err(db_err)?,
                heading_level: row.get::<i64>(5).unwrap_or(0),
                representative_text: row.get(6).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Embeddings
    // -----------------------------------------------------------------------

    pub async fn insert_candidate_embedding(&self, embedding: &CandidateEmbedding) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO candidate_embeddings
                   (candidate_id, mode, model_name, vector, token_count, tokenization_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    embedding.candidate_id.as_str(),
                    embedding.mode.as_str(),
                    embedding.model_name.as_str(),
                    serialize_vector(&embedding.vector),
                    i64::from(embedding.token_count),
                    embedding.tokenization_mode.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Stored candidate embeddings for one view. Fails on a malformed vector.
    pub async fn list_candidate_embeddings(
        &self,
        mode: EmbeddingMode,
    ) -> Result<Vec<CandidateEmbedding>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT candidate_id, model_name, vector, token_count, tokenization_mode
                 FROM candidate_embeddings WHERE mode = ?1 ORDER BY candidate_id",
                params![mode.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let vector: String = row.get(2).map_err(db_err)?;
            let tokenization: String = row.get(4).map_err(db_err)?;
            results.push(CandidateEmbedding {
                candidate_id: row.get(0).map_err(db_err)?,
                mode,
                model_name: row.get(1).map_err(db_err)?,
                vector: parse_vector(&vector)?,
                token_count: row.get::<u32>(3).map_err(db_err)?,
                tokenization_mode: tokenization.parse()?,
            });
        }
        Ok(results)
    }

    pub async fn insert_domain_embedding(&self, embedding: &DomainEmbedding) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO domain_embeddings
                   (domain_id, model_name, vector, token_count, tokenization_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    embedding.domain_id.as_str(),
                    embedding.model_name.as_str(),
                    serialize_vector(&embedding.vector),
                    i64::from(embedding.token_count),
                    embedding.tokenization_mode.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_domain_embeddings(&self) -> Result<Vec<DomainEmbedding>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT domain_id, model_name, vector, token_count, tokenization_mode
                 FROM domain_embeddings ORDER BY domain_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let vector: String = row.get(2).map_err(db_err)?;
            let tokenization: String = row.get(4).map_err(db_err)?;
            results.push(DomainEmbedding {
                domain_id: row.get(0).map_err(db_err)?,
                model_name: row.get(1).map_err(db_err)?,
                vector: parse_vector(&vector)?,
                token_count: row.get::<u32>(3).map_err(db_err)?,
                tokenization_mode: tokenization.parse()?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Similarity
    // -----------------------------------------------------------------------

    /// Write similarity rows. Returns the number written.
    pub async fn insert_similarity_pairs(&self, pairs: &[SimilarityPair]) -> Result<usize> {
        self.storage.check_writable()?;
        for pair in pairs {
            self.storage
                .conn
                .execute(
                    "INSERT OR REPLACE INTO candidate_similarity
                       (candidate_a_id, candidate_b_id, similarity, mode)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        pair.candidate_a_id.as_str(),
                        pair.candidate_b_id.as_str(),
                        pair.score,
                        pair.mode.as_str(),
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(pairs.len())
    }

    pub async fn list_similarity_pairs(&self) -> Result<Vec<SimilarityPair>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT candidate_a_id, candidate_b_id, similarity, mode
                 FROM candidate_similarity
                 ORDER BY candidate_a_id, candidate_b_id, mode",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let mode: String = row.get(3).map_err(db_err)?;
            results.push(SimilarityPair {
                candidate_a_id: row.get(0).map_err(db_err)?,
                candidate_b_id: row.get(1).map_err(db_err)?,
                score: row.get::<f64>(2).map_err(db_err)?,
                mode: mode.parse()?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Domains
    // -----------------------------------------------------------------------

    pub async fn insert_domain(&self, domain: &Domain) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT INTO domains (domain_id, display_name, created_at) VALUES (?1, ?2, ?3)",
                params![
                    domain.domain_id.as_str(),
                    domain.display_name.as_str(),
                    domain.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_domains(&self) -> Result<Vec<Domain>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT domain_id, display_name, created_at FROM domains ORDER BY domain_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let created_at: String = row.get(2).map_err(db_err)?;
            results.push(Domain {
                domain_id: row.get(0).map_err(db_err)?,
                display_name: row.get(1).map_err(db_err)?,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(results)
    }

    pub async fn insert_domain_alias(&self, domain_id: &str, alias: &AliasInfo) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO domain_aliases (domain_id, alias, source_pdf_id, heading_level)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    domain_id,
                    alias.alias.as_str(),
                    alias.source_pdf_id.as_str(),
                    alias.heading_level,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// All alias rows as `(domain_id, alias)`, ordered by domain then alias.
    pub async fn list_domain_aliases(&self) -> Result<Vec<(String, AliasInfo)>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT domain_id, alias, source_pdf_id, heading_level
                 FROM domain_aliases ORDER BY domain_id, alias, source_pdf_id",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let domain_id: String = row.get(0).map_err(db_err)?;
            results.push((
                domain_id,
                AliasInfo {
                    alias: row.get(1).map_err(db_err)?,
                    source_pdf_id: row.get(2).map_err(db_err)?,
                    heading_level: row.get::<i64>(3).unwrap_or(0),
                },
            ));
        }
        Ok(results)
    }

    pub async fn insert_domain_source(&self, domain_id: &str, pdf_id: &str) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO domain_sources (domain_id, pdf_id) VALUES (?1, ?2)",
                params![domain_id, pdf_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// `(domain_id, pdf_id)` rows.
    pub async fn list_domain_sources(&self) -> Result<Vec<(String, String)>> {
        self.list_pairs("SELECT domain_id, pdf_id FROM domain_sources ORDER BY domain_id, pdf_id")
            .await
    }

    pub async fn insert_block_domain_map(&self, block_id: &str, domain_id: &str) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO block_domain_map (block_id, domain_id) VALUES (?1, ?2)",
                params![block_id, domain_id],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// `(block_id, domain_id)` rows.
    pub async fn list_block_domain_map(&self) -> Result<Vec<(String, String)>> {
        self.list_pairs("SELECT block_id, domain_id FROM block_domain_map ORDER BY block_id, domain_id")
            .await
    }

    async fn list_pairs(&self, sql: &str) -> Result<Vec<(String, String)>> {
        let mut rows = self
            .storage
            .conn
            .query(sql, params![])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push((row.get(0).map_err(db_err)?, row.get(1).map_err(db_err)?));
        }
        Ok(results)
    }
}
