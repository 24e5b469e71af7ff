//! Core data model for domain discovery: source blocks, candidates,
//! similarity evidence, canonical domains, and the human review queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainScoutError;

// ---------------------------------------------------------------------------
// Source documents and blocks
// ---------------------------------------------------------------------------

/// A registered source document (typically a PDF that was parsed elsewhere).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Stable document identifier.
    pub pdf_id: String,
    /// Where the original file lives on disk.
    pub file_path: String,
    /// SHA-256 of the imported content.
    pub checksum: String,
    /// When the document was imported.
    pub ingested_at: DateTime<Utc>,
}

/// Kind of a parsed content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Heading,
    Paragraph,
    /// Anything else the parser emits (tables, captions, ...). Never yields a candidate.
    #[serde(other)]
    Other,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heading => "heading",
            Self::Paragraph => "paragraph",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for BlockType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "heading" => Self::Heading,
            "paragraph" => Self::Paragraph,
            _ => Self::Other,
        })
    }
}

/// One block of parsed document text. Ordering by `position_index` is significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub block_id: String,
    pub pdf_id: String,
    #[serde(default)]
    pub section_path: String,
    #[serde(default)]
    pub heading_level: i64,
    pub block_type: BlockType,
    pub text: String,
    #[serde(default)]
    pub page_index: i64,
    #[serde(default)]
    pub position_index: i64,
}

// ---------------------------------------------------------------------------
// Candidates and similarity
// ---------------------------------------------------------------------------

/// A single extracted mention of a possible domain, tied to one source block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCandidate {
    /// Always equal to `source_block_id`.
    pub candidate_id: String,
    pub candidate_name: String,
    pub normalized_name: String,
    pub source_pdf_id: String,
    pub source_block_id: String,
    pub heading_level: i64,
    pub representative_text: String,
}

/// Which embedding view a similarity score was computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingMode {
    NameOnly,
    NamePlusSummary,
}

impl EmbeddingMode {
    pub const ALL: [EmbeddingMode; 2] = [Self::NameOnly, Self::NamePlusSummary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NameOnly => "name_only",
            Self::NamePlusSummary => "name_plus_summary",
        }
    }
}

impl std::fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EmbeddingMode {
    type Err = DomainScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "name_only" => Ok(Self::NameOnly),
            "name_plus_summary" => Ok(Self::NamePlusSummary),
            other => Err(DomainScoutError::validation(format!(
                "unknown embedding mode: {other}"
            ))),
        }
    }
}

/// A scored candidate pair. `candidate_a_id < candidate_b_id` is not guaranteed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityPair {
    pub candidate_a_id: String,
    pub candidate_b_id: String,
    pub score: f64,
    pub mode: EmbeddingMode,
}

/// How token counts reported alongside an embedding batch were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizationMode {
    Exact,
    Approx,
}

impl TokenizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Approx => "approx",
        }
    }
}

impl std::str::FromStr for TokenizationMode {
    type Err = DomainScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "exact" => Ok(Self::Exact),
            "approx" => Ok(Self::Approx),
            other => Err(DomainScoutError::validation(format!(
                "unknown tokenization mode: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Domains
// ---------------------------------------------------------------------------

/// A canonical domain, one per cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    /// `domain_001`, `domain_002`, ... in order of each cluster's smallest member id.
    pub domain_id: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
}

/// One cluster member's naming evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasInfo {
    pub alias: String,
    pub source_pdf_id: String,
    pub heading_level: i64,
}

impl AliasInfo {
    pub fn new(alias: impl Into<String>, source_pdf_id: impl Into<String>, heading_level: i64) -> Self {
        Self {
            alias: alias.into(),
            source_pdf_id: source_pdf_id.into(),
            heading_level,
        }
    }
}

/// Language the display name should preferably be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredLanguage {
    #[default]
    Auto,
    En,
    Zh,
}

impl PreferredLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::En => "en",
            Self::Zh => "zh",
        }
    }
}

impl std::str::FromStr for PreferredLanguage {
    type Err = DomainScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "en" => Ok(Self::En),
            "zh" => Ok(Self::Zh),
            other => Err(DomainScoutError::config(format!(
                "unsupported display language '{other}': expected auto, en, or zh"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Review queue
// ---------------------------------------------------------------------------

/// Human decision state of a review item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Accepted,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReviewStatus {
    type Err = DomainScoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            other => Err(DomainScoutError::validation(format!(
                "unknown review status: {other}"
            ))),
        }
    }
}

/// A borderline pair awaiting (or carrying) a human judgment.
///
/// This is the only curated record: pipeline runs never delete or rewrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub review_id: String,
    pub candidate_a_id: String,
    pub candidate_b_id: String,
    pub similarity: f64,
    pub reason: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}
