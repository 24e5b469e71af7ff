//! Canonical display-name selection and the deferred naming request.
//!
//! The mechanical ranking always produces a name. When a cluster's aliases
//! carry too little signal, a [`LlmNamingRequest`] is prepared for an
//! external naming service; nothing in this crate sends it.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use domainscout_shared::{AliasInfo, PreferredLanguage};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Display name for an empty alias list.
pub const UNKNOWN_DISPLAY_NAME: &str = "unknown";

/// Below this max pairwise Jaccard score the aliases are considered unrelated.
const MIN_ALIAS_AGREEMENT: f64 = 0.3;

/// Aliases that say nothing about what the domain is.
const LOW_SIGNAL_ALIASES: [&str; 5] = ["overview", "introduction", "general", "summary", "background"];

// ---------------------------------------------------------------------------
// Mechanical ranking
// ---------------------------------------------------------------------------

/// Pick one display name from a cluster's aliases.
///
/// Each distinct alias text is ranked by, in order: more distinct source
/// documents, shallower best heading level, language preference, fewer
/// characters, then the text itself.
pub fn select_display_name(aliases: &[AliasInfo], language: PreferredLanguage) -> String {
    let mut sources: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
    let mut best_level: BTreeMap<&str, i64> = BTreeMap::new();
    for info in aliases {
        let alias = info.alias.as_str();
        sources
            .entry(alias)
            .or_default()
            .insert(info.source_pdf_id.as_str());
        best_level
            .entry(alias)
            .and_modify(|level| *level = (*level).min(info.heading_level))
            .or_insert(info.heading_level);
    }

    sources
        .iter()
        .map(|(&alias, pdfs)| {
            (
                -(pdfs.len() as i64),
                best_level[alias],
                language_penalty(alias, language),
                alias.trim().chars().count(),
                alias,
            )
        })
        .min()
        .map(|(.., alias)| alias.to_string())
        .unwrap_or_else(|| UNKNOWN_DISPLAY_NAME.to_string())
}

/// ASCII-only with at least one letter.
fn is_english(text: &str) -> bool {
    text.is_ascii() && text.chars().any(char::is_alphabetic)
}

fn language_penalty(text: &str, language: PreferredLanguage) -> u8 {
    let english = is_english(text);
    match language {
        PreferredLanguage::Auto | PreferredLanguage::En => u8::from(!english),
        PreferredLanguage::Zh => u8::from(english),
    }
}

// ---------------------------------------------------------------------------
// Fallback decision
// ---------------------------------------------------------------------------

/// Whether a cluster's aliases should be named by the external service.
///
/// True when there are no aliases, when every alias is low-signal, or when
/// no two aliases share enough words (max pairwise Jaccard below 0.3). A
/// single alias has no pairs and therefore falls back.
pub fn should_use_llm_fallback<S: AsRef<str>>(aliases: &[S]) -> bool {
    if aliases.is_empty() {
        return true;
    }
    let normalized: Vec<String> = aliases.iter().map(|a| normalize_alias(a.as_ref())).collect();
    if normalized
        .iter()
        .all(|a| LOW_SIGNAL_ALIASES.contains(&a.as_str()))
    {
        return true;
    }
    max_jaccard_similarity(&normalized) < MIN_ALIAS_AGREEMENT
}

fn normalize_alias(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn max_jaccard_similarity(items: &[String]) -> f64 {
    let word_sets: Vec<BTreeSet<&str>> = items
        .iter()
        .map(|item| item.split_whitespace().collect())
        .collect();

    let mut max_sim = 0.0_f64;
    for (i, a) in word_sets.iter().enumerate() {
        for b in &word_sets[i + 1..] {
            if a.is_empty() || b.is_empty() {
                continue;
            }
            let shared = a.intersection(b).count() as f64;
            let total = a.union(b).count() as f64;
            max_sim = max_sim.max(shared / total);
        }
    }
    max_sim
}

// ---------------------------------------------------------------------------
// Deferred request
// ---------------------------------------------------------------------------

/// Structured input for an external naming service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmNamingRequest {
    pub aliases: Vec<String>,
    pub snippets: Vec<String>,
    pub language: PreferredLanguage,
    /// Shape the service must answer with.
    pub output_schema: serde_json::Value,
    pub constraints: Vec<String>,
}

/// Package aliases and evidence snippets into a naming request.
pub fn build_llm_naming_request(
    aliases: &[String],
    snippets: &[String],
    language: PreferredLanguage,
) -> LlmNamingRequest {
    LlmNamingRequest {
        aliases: aliases.to_vec(),
        snippets: snippets.to_vec(),
        language,
        output_schema: json!({
            "display_name": "string",
            "summary": "string",
            "keywords": [],
        }),
        constraints: vec![
            "Do not invent concepts not supported by aliases/snippets.".into(),
            "Use only terms grounded in provided inputs.".into(),
        ],
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Outcome of naming one cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum NamingDecision {
    /// Final name chosen mechanically.
    Named(String),
    /// Provisional mechanical name plus a request for the external service.
    Deferred {
        provisional: String,
        request: LlmNamingRequest,
    },
}

impl NamingDecision {
    /// Name to store now.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Deferred { provisional, .. } => provisional,
        }
    }

    pub fn into_request(self) -> Option<LlmNamingRequest> {
        match self {
            Self::Named(_) => None,
            Self::Deferred { request, .. } => Some(request),
        }
    }
}

/// How a cluster gets its display name.
pub trait NamingStrategy {
    fn name_cluster(&self, aliases: &[AliasInfo], snippets: &[String]) -> NamingDecision;
}

/// Always ranks aliases; never defers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MechanicalNaming {
    pub language: PreferredLanguage,
}

impl NamingStrategy for MechanicalNaming {
    fn name_cluster(&self, aliases: &[AliasInfo], _snippets: &[String]) -> NamingDecision {
        NamingDecision::Named(select_display_name(aliases, self.language))
    }
}

/// Ranks aliases, and defers to the external service when they carry too little signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackAwareNaming {
    pub language: PreferredLanguage,
}

impl NamingStrategy for FallbackAwareNaming {
    fn name_cluster(&self, aliases: &[AliasInfo], snippets: &[String]) -> NamingDecision {
        let provisional = select_display_name(aliases, self.language);
        let texts: Vec<String> = aliases.iter().map(|a| a.alias.clone()).collect();
        if should_use_llm_fallback(texts.as_slice()) {
            NamingDecision::Deferred {
                provisional,
                request: build_llm_naming_request(&texts, snippets, self.language),
            }
        } else {
            NamingDecision::Named(provisional)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_sources_outrank_heading_depth() {
        let aliases = vec![
            AliasInfo::new("Payments", "p1", 2),
            AliasInfo::new("Payments", "p2", 3),
            AliasInfo::new("Billing", "p1", 1),
        ];
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Auto), "Payments");
    }

    #[test]
    fn repetition_within_one_source_does_not_count() {
        let aliases = vec![
            AliasInfo::new("Payments", "p1", 2),
            AliasInfo::new("Payments", "p1", 2),
            AliasInfo::new("Billing", "p1", 1),
        ];
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Auto), "Billing");
    }

    #[test]
    fn empty_aliases_are_unknown() {
        assert_eq!(select_display_name(&[], PreferredLanguage::En), "unknown");
    }

    #[test]
    fn language_preference_breaks_ties() {
        let aliases = vec![
            AliasInfo::new("清算", "p1", 1),
            AliasInfo::new("Clearing", "p2", 1),
        ];
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Auto), "Clearing");
        assert_eq!(select_display_name(&aliases, PreferredLanguage::En), "Clearing");
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Zh), "清算");
    }

    #[test]
    fn length_then_text_are_final_tiebreaks() {
        let aliases = vec![
            AliasInfo::new("Risk Engine", "p1", 1),
            AliasInfo::new("Risk", "p2", 1),
            AliasInfo::new("Rsk", "p3", 1),
            AliasInfo::new("Abc", "p4", 1),
        ];
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Auto), "Abc");
    }

    #[test]
    fn selection_is_order_independent() {
        let mut aliases = vec![
            AliasInfo::new("Ledger", "p1", 2),
            AliasInfo::new("General Ledger", "p2", 1),
            AliasInfo::new("Ledger", "p3", 3),
        ];
        let first = select_display_name(&aliases, PreferredLanguage::Auto);
        aliases.reverse();
        assert_eq!(select_display_name(&aliases, PreferredLanguage::Auto), first);
        assert_eq!(first, "Ledger");
    }

    #[test]
    fn fallback_rules() {
        let none: [&str; 0] = [];
        assert!(should_use_llm_fallback(&none));
        assert!(should_use_llm_fallback(&["Overview", " INTRODUCTION "]));
        assert!(should_use_llm_fallback(&["Payments"]));
        assert!(should_use_llm_fallback(&["Payments", "Risk Engine"]));
        assert!(!should_use_llm_fallback(&["Payment Gateway", "payment  gateway"]));
        assert!(!should_use_llm_fallback(&["Risk Engine", "Risk Engine Core"]));
    }

    #[test]
    fn request_carries_inputs_and_constraints() {
        let request = build_llm_naming_request(
            &["Overview".to_string()],
            &["Overview of the clearing flow".to_string()],
            PreferredLanguage::Zh,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["language"], "zh");
        assert_eq!(json["output_schema"]["display_name"], "string");
        assert_eq!(request.constraints.len(), 2);
    }

    #[test]
    fn strategies() {
        let weak = vec![AliasInfo::new("Overview", "p1", 1)];
        let strong = vec![
            AliasInfo::new("Risk Engine", "p1", 1),
            AliasInfo::new("Risk Engine", "p2", 2),
        ];

        let mechanical = MechanicalNaming::default();
        assert_eq!(
            mechanical.name_cluster(&weak, &[]),
            NamingDecision::Named("Overview".into())
        );

        let aware = FallbackAwareNaming::default();
        let deferred = aware.name_cluster(&weak, &[]);
        assert_eq!(deferred.display_name(), "Overview");
        assert!(deferred.into_request().is_some());

        let named = aware.name_cluster(&strong, &[]);
        assert_eq!(named, NamingDecision::Named("Risk Engine".into()));
    }
}
