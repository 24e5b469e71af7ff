//! SQL migration definitions for the domainscout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.
//!
//! Tables fall into three regions with different lifecycles:
//! - sources: `pdfs`, `content_blocks` (written by import)
//! - derived: candidates, embeddings, similarity, domains and their mappings
//!   (truncated and recomputed by every pipeline run)
//! - curated: `review_queue` (human decisions, never truncated)
//! - cache: `token_count_cache`, `trunc_text_cache` (pure functions of text
//!   and model, kept across runs)

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: sources, derived domain tables, review queue",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Sources
CREATE TABLE IF NOT EXISTS pdfs (
    pdf_id      TEXT PRIMARY KEY,
    file_path   TEXT NOT NULL,
    checksum    TEXT NOT NULL,
    ingested_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pdfs_checksum ON pdfs(checksum);

CREATE TABLE IF NOT EXISTS content_blocks (
    block_id       TEXT PRIMARY KEY,
    pdf_id         TEXT NOT NULL REFERENCES pdfs(pdf_id) ON DELETE CASCADE,
    section_path   TEXT,
    heading_level  INTEGER,
    block_type     TEXT NOT NULL,
    text           TEXT NOT NULL,
    page_index     INTEGER,
    position_index INTEGER
);

CREATE INDEX IF NOT EXISTS idx_content_blocks_pdf_id ON content_blocks(pdf_id);

-- Derived
CREATE TABLE IF NOT EXISTS domain_candidates (
    candidate_id        TEXT PRIMARY KEY,
    candidate_name      TEXT NOT NULL,
    normalized_name     TEXT NOT NULL,
    source_pdf_id       TEXT NOT NULL,
    source_block_id     TEXT NOT NULL,
    heading_level       INTEGER,
    representative_text TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_candidates_pdf_id ON domain_candidates(source_pdf_id);
CREATE INDEX IF NOT EXISTS idx_candidates_norm_name ON domain_candidates(normalized_name);

CREATE TABLE IF NOT EXISTS candidate_embeddings (
    candidate_id      TEXT NOT NULL,
    mode              TEXT NOT NULL,
    model_name        TEXT NOT NULL,
    vector            TEXT NOT NULL,
    token_count       INTEGER NOT NULL,
    tokenization_mode TEXT NOT NULL,
    PRIMARY KEY (candidate_id, mode)
);

CREATE TABLE IF NOT EXISTS candidate_similarity (
    candidate_a_id TEXT NOT NULL,
    candidate_b_id TEXT NOT NULL,
    similarity     REAL NOT NULL,
    mode           TEXT NOT NULL,
    PRIMARY KEY (candidate_a_id, candidate_b_id, mode)
);

CREATE INDEX IF NOT EXISTS idx_candidate_similarity_mode ON candidate_similarity(mode);

CREATE TABLE IF NOT EXISTS domains (
    domain_id    TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS domain_aliases (
    domain_id     TEXT NOT NULL REFERENCES domains(domain_id),
    alias         TEXT NOT NULL,
    source_pdf_id TEXT NOT NULL,
    heading_level INTEGER,
    PRIMARY KEY (domain_id, alias, source_pdf_id)
);

CREATE INDEX IF NOT EXISTS idx_domain_aliases_domain_id ON domain_aliases(domain_id);

CREATE TABLE IF NOT EXISTS domain_sources (
    domain_id TEXT NOT NULL REFERENCES domains(domain_id),
    pdf_id    TEXT NOT NULL,
    PRIMARY KEY (domain_id, pdf_id)
);

CREATE INDEX IF NOT EXISTS idx_domain_sources_domain_id ON domain_sources(domain_id);

CREATE TABLE IF NOT EXISTS block_domain_map (
    block_id  TEXT NOT NULL,
    domain_id TEXT NOT NULL REFERENCES domains(domain_id),
    PRIMARY KEY (block_id, domain_id)
);

CREATE TABLE IF NOT EXISTS domain_embeddings (
    domain_id         TEXT PRIMARY KEY REFERENCES domains(domain_id),
    model_name        TEXT NOT NULL,
    vector            TEXT NOT NULL,
    token_count       INTEGER NOT NULL,
    tokenization_mode TEXT NOT NULL
);

-- Curated (no foreign keys into derived tables: candidates are recomputed)
CREATE TABLE IF NOT EXISTS review_queue (
    review_id      TEXT PRIMARY KEY,
    candidate_a_id TEXT NOT NULL,
    candidate_b_id TEXT NOT NULL,
    similarity     REAL NOT NULL,
    reason         TEXT NOT NULL,
    status         TEXT NOT NULL,
    created_at     TEXT NOT NULL,
    resolved_at    TEXT
);

CREATE INDEX IF NOT EXISTS idx_review_queue_status ON review_queue(status);
CREATE INDEX IF NOT EXISTS idx_review_queue_pair ON review_queue(candidate_a_id, candidate_b_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Tokenization caches",
            sql: r#"
CREATE TABLE IF NOT EXISTS token_count_cache (
    text_hash         TEXT NOT NULL,
    model_name        TEXT NOT NULL,
    token_count       INTEGER NOT NULL,
    tokenization_mode TEXT NOT NULL,
    PRIMARY KEY (text_hash, model_name)
);

CREATE TABLE IF NOT EXISTS trunc_text_cache (
    text_hash         TEXT NOT NULL,
    model_name        TEXT NOT NULL,
    max_tokens        INTEGER NOT NULL,
    truncated_text    TEXT NOT NULL,
    tokenization_mode TEXT NOT NULL,
    PRIMARY KEY (text_hash, model_name, max_tokens)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
