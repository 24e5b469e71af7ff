//! Token counting and truncation for embedding inputs.
//!
//! Exact counts use the model's BPE encoding, or `cl100k_base` for models
//! tiktoken does not know. The character-weight estimate is used only when
//! no encoding loads and the config allows it.

use domainscout_shared::{DomainScoutError, Result, TokenizationMode};
use domainscout_storage::{CachedTokenCount, CachedTruncation, Storage};
use sha2::{Digest, Sha256};
use tiktoken_rs::CoreBPE;
use tracing::{debug, warn};

/// Fraction of the token budget used when truncating by estimate.
const APPROX_SAFETY_RATIO: f64 = 0.7;

/// Tokens given up at a cut that splits a multi-byte char.
const MAX_DECODE_BACKOFF: usize = 4;

// ---------------------------------------------------------------------------
// Estimate
// ---------------------------------------------------------------------------

/// Token estimate: a quarter token per ASCII char, one per other char.
pub fn approx_token_count(text: &str) -> u32 {
    approx_tokens(text).ceil() as u32
}

fn approx_tokens(text: &str) -> f64 {
    text.chars().map(char_weight).sum()
}

fn char_weight(c: char) -> f64 {
    if c.is_ascii() { 0.25 } else { 1.0 }
}

/// Longest prefix whose estimate stays within 70% of `max_tokens`.
pub fn approx_truncate(text: &str, max_tokens: usize) -> &str {
    let limit = max_tokens as f64 * APPROX_SAFETY_RATIO;
    let mut total = 0.0;
    for (idx, c) in text.char_indices() {
        total += char_weight(c);
        if total > limit {
            return &text[..idx];
        }
    }
    text
}

/// Hex SHA-256 of a text, used as the cache key.
pub fn text_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Counts and truncates text for one embedding model.
pub enum Tokenizer {
    Exact(CoreBPE),
    Approx,
}

impl Tokenizer {
    /// Load the encoding for `model`. Without an encoding, estimates when
    /// `approx_fallback` is set and fails otherwise.
    pub fn for_model(model: &str, approx_fallback: bool) -> Result<Self> {
        let bpe = tiktoken_rs::get_bpe_from_model(model).or_else(|_| {
            debug!(model, "no model-specific encoding, using cl100k_base");
            tiktoken_rs::cl100k_base()
        });
        match bpe {
            Ok(bpe) => Ok(Self::Exact(bpe)),
            Err(e) if approx_fallback => {
                warn!(model, error = %e, "tokenizer unavailable, estimating token counts");
                Ok(Self::Approx)
            }
            Err(e) => Err(DomainScoutError::config(format!(
                "no tokenizer for model '{model}': {e}. \
                 Set embedding.tokenization_fallback_approx_enabled to estimate instead."
            ))),
        }
    }

    pub fn mode(&self) -> TokenizationMode {
        match self {
            Self::Exact(_) => TokenizationMode::Exact,
            Self::Approx => TokenizationMode::Approx,
        }
    }

    pub fn count(&self, text: &str) -> u32 {
        match self {
            Self::Exact(bpe) => {
                u32::try_from(bpe.encode_ordinary(text).len()).unwrap_or(u32::MAX)
            }
            Self::Approx => approx_token_count(text),
        }
    }

    /// Exact: the text of the first `max_tokens` tokens. Approx: the
    /// estimate-based prefix.
    pub fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let bpe = match self {
            Self::Exact(bpe) => bpe,
            Self::Approx => return approx_truncate(text, max_tokens).to_string(),
        };
        let tokens = bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        for end in (max_tokens.saturating_sub(MAX_DECODE_BACKOFF)..=max_tokens).rev() {
            if let Ok(decoded) = bpe.decode(tokens[..end].to_vec()) {
                return decoded;
            }
        }
        approx_truncate(text, max_tokens).to_string()
    }

    /// Truncate and count every text, without caching.
    pub fn prepare(&self, texts: &[String], max_tokens: usize) -> PreparedTexts {
        let texts: Vec<String> = texts.iter().map(|t| self.truncate(t, max_tokens)).collect();
        let token_counts = texts.iter().map(|t| self.count(t)).collect();
        PreparedTexts {
            texts,
            token_counts,
            tokenization_mode: self.mode(),
        }
    }
}

/// Embedding input that fits the model's limit, with per-text token counts.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTexts {
    pub texts: Vec<String>,
    pub token_counts: Vec<u32>,
    /// `Approx` if any text was truncated or counted by estimate.
    pub tokenization_mode: TokenizationMode,
}

/// [`Tokenizer::prepare`] through the storage caches.
///
/// Truncations are keyed by original text, model, and budget; counts by
/// truncated text and model.
pub async fn prepare_texts(
    storage: &Storage,
    tokenizer: &Tokenizer,
    model_name: &str,
    texts: &[String],
    max_tokens: usize,
) -> Result<PreparedTexts> {
    let cache = storage.token_cache();
    let mut prepared = PreparedTexts {
        texts: Vec::with_capacity(texts.len()),
        token_counts: Vec::with_capacity(texts.len()),
        tokenization_mode: TokenizationMode::Exact,
    };
    let mut hits = 0usize;

    for text in texts {
        let hash = text_hash(text);
        let truncation = match cache.get_truncation(&hash, model_name, max_tokens).await? {
            Some(cached) => {
                hits += 1;
                cached
            }
            None => {
                let fresh = CachedTruncation {
                    truncated_text: tokenizer.truncate(text, max_tokens),
                    tokenization_mode: tokenizer.mode(),
                };
                cache.set_truncation(&hash, model_name, max_tokens, &fresh).await?;
                fresh
            }
        };

        let truncated_hash = text_hash(&truncation.truncated_text);
        let count = match cache.get_token_count(&truncated_hash, model_name).await? {
            Some(cached) => cached,
            None => {
                let fresh = CachedTokenCount {
                    token_count: tokenizer.count(&truncation.truncated_text),
                    tokenization_mode: tokenizer.mode(),
                };
                cache.set_token_count(&truncated_hash, model_name, fresh).await?;
                fresh
            }
        };

        if truncation.tokenization_mode == TokenizationMode::Approx
            || count.tokenization_mode == TokenizationMode::Approx
        {
            prepared.tokenization_mode = TokenizationMode::Approx;
        }
        prepared.texts.push(truncation.truncated_text);
        prepared.token_counts.push(count.token_count);
    }

    debug!(texts = texts.len(), cache_hits = hits, "prepared embedding input");
    Ok(prepared)
}
