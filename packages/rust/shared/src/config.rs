//! Application configuration for domainscout.
//!
//! User config lives at `~/.domainscout/domainscout.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DomainScoutError, Result};
use crate::types::{EmbeddingMode, PreferredLanguage};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "domainscout.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".domainscout";

// ---------------------------------------------------------------------------
// Config structs (matching domainscout.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database location.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Merge / review thresholds per embedding mode.
    #[serde(default)]
    pub thresholds: ThresholdsConfig,

    /// Pair blocking heuristic.
    #[serde(default)]
    pub blocking: BlockingConfig,

    /// Display-name selection.
    #[serde(default)]
    pub naming: NamingConfig,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "./data/domainscout.db".into()
}

/// Which wire dialect the embedding endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    #[default]
    OpenAi,
    Azure,
}

/// `[embedding]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Full URL of the embeddings endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Embedding model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// `api-version` query parameter, Azure only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    /// Texts per request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-text input cap, in tokens.
    #[serde(default = "default_max_tokens")]
    pub max_tokens_per_embed: usize,

    /// Estimate token counts when no tokenizer can be loaded for the model,
    /// instead of failing the run.
    #[serde(default)]
    pub tokenization_fallback_approx_enabled: bool,

    /// Request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::default(),
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            api_version: None,
            batch_size: default_batch_size(),
            max_tokens_per_embed: default_max_tokens(),
            tokenization_fallback_approx_enabled: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.openai.com/v1/embeddings".into()
}
fn default_model() -> String {
    "text-embedding-3-small".into()
}
fn default_api_key_env() -> String {
    "EMBEDDING_API_KEY".into()
}
fn default_batch_size() -> usize {
    16
}
fn default_max_tokens() -> usize {
    8192
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[thresholds]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdsConfig {
    #[serde(default = "default_merge_name_only")]
    pub merge_name_only: f64,
    #[serde(default = "default_review_name_only")]
    pub review_name_only: f64,
    #[serde(default = "default_merge_name_plus_summary")]
    pub merge_name_plus_summary: f64,
    #[serde(default = "default_review_name_plus_summary")]
    pub review_name_plus_summary: f64,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        Self {
            merge_name_only: default_merge_name_only(),
            review_name_only: default_review_name_only(),
            merge_name_plus_summary: default_merge_name_plus_summary(),
            review_name_plus_summary: default_review_name_plus_summary(),
        }
    }
}

fn default_merge_name_only() -> f64 {
    0.90
}
fn default_review_name_only() -> f64 {
    0.85
}
fn default_merge_name_plus_summary() -> f64 {
    0.86
}
fn default_review_name_plus_summary() -> f64 {
    0.82
}

/// `[blocking]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockingConfig {
    /// Characters of the normalized name used as the bucket key.
    #[serde(default = "default_prefix_len")]
    pub prefix_len: usize,
    /// Maximum length difference for a compared pair within a bucket.
    #[serde(default = "default_length_window")]
    pub length_window: usize,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            prefix_len: default_prefix_len(),
            length_window: default_length_window(),
        }
    }
}

fn default_prefix_len() -> usize {
    4
}
fn default_length_window() -> usize {
    6
}

/// `[naming]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamingConfig {
    #[serde(default)]
    pub preferred_display_language: PreferredLanguage,
}

// ---------------------------------------------------------------------------
// Threshold table (runtime, validated)
// ---------------------------------------------------------------------------

/// `(merge_threshold, review_threshold)` for one embedding mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeThresholds {
    pub merge: f64,
    pub review: f64,
}

impl ModeThresholds {
    /// Build a pair, rejecting `review > merge` and values outside `[0, 1]`.
    pub fn new(merge: f64, review: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&merge) || !(0.0..=1.0).contains(&review) {
            return Err(DomainScoutError::config(format!(
                "thresholds must lie in [0, 1] (merge={merge}, review={review})"
            )));
        }
        if review > merge {
            return Err(DomainScoutError::config(format!(
                "review threshold {review} exceeds merge threshold {merge}"
            )));
        }
        Ok(Self { merge, review })
    }
}

/// Per-mode thresholds consulted by the merge engine.
#[derive(Debug, Clone, Default)]
pub struct ThresholdTable {
    by_mode: BTreeMap<EmbeddingMode, ModeThresholds>,
}

impl ThresholdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, mode: EmbeddingMode, thresholds: ModeThresholds) -> Self {
        self.by_mode.insert(mode, thresholds);
        self
    }

    /// Thresholds for `mode`; a missing entry is a fatal configuration error.
    pub fn get(&self, mode: EmbeddingMode) -> Result<ModeThresholds> {
        self.by_mode.get(&mode).copied().ok_or_else(|| {
            DomainScoutError::config(format!("missing thresholds for mode: {mode}"))
        })
    }

    /// Lowest review threshold across all modes (the similarity storage floor).
    pub fn min_review_threshold(&self) -> Option<f64> {
        self.by_mode.values().map(|t| t.review).reduce(f64::min)
    }
}

impl TryFrom<&AppConfig> for ThresholdTable {
    type Error = DomainScoutError;

    fn try_from(config: &AppConfig) -> Result<Self> {
        let t = &config.thresholds;
        Ok(Self::new()
            .with(
                EmbeddingMode::NameOnly,
                ModeThresholds::new(t.merge_name_only, t.review_name_only)?,
            )
            .with(
                EmbeddingMode::NamePlusSummary,
                ModeThresholds::new(t.merge_name_plus_summary, t.review_name_plus_summary)?,
            ))
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.domainscout/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| DomainScoutError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.domainscout/domainscout.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| DomainScoutError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        DomainScoutError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| DomainScoutError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| DomainScoutError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| DomainScoutError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the embedding API key env var is set and non-empty, and that
/// the endpoint parses as a URL. Returns the key.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    url::Url::parse(&config.embedding.endpoint).map_err(|e| {
        DomainScoutError::config(format!(
            "invalid embedding endpoint '{}': {e}",
            config.embedding.endpoint
        ))
    })?;

    let var_name = &config.embedding.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(DomainScoutError::config(format!(
            "embedding API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("db_path"));
        assert!(toml_str.contains("EMBEDDING_API_KEY"));
        assert!(toml_str.contains("preferred_display_language = \"auto\""));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.blocking.prefix_len, 4);
        assert_eq!(parsed.blocking.length_window, 6);
        assert_eq!(parsed.embedding.model, "text-embedding-3-small");
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[thresholds]
merge_name_only = 0.95

[embedding]
provider = "azure"
api_version = "2024-02-15-preview"

[naming]
preferred_display_language = "zh"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.thresholds.merge_name_only, 0.95);
        assert_eq!(config.thresholds.review_name_only, 0.85);
        assert_eq!(config.embedding.provider, EmbeddingProvider::Azure);
        assert_eq!(config.naming.preferred_display_language, PreferredLanguage::Zh);
        assert!(!config.embedding.tokenization_fallback_approx_enabled);
    }

    #[test]
    fn threshold_table_from_app_config() {
        let table = ThresholdTable::try_from(&AppConfig::default()).expect("table");
        let name_only = table.get(EmbeddingMode::NameOnly).unwrap();
        assert_eq!(name_only.merge, 0.90);
        assert_eq!(name_only.review, 0.85);
        assert_eq!(table.min_review_threshold(), Some(0.82));
    }

    #[test]
    fn threshold_table_rejects_inverted_band() {
        let mut config = AppConfig::default();
        config.thresholds.review_name_plus_summary = 0.99;
        let err = ThresholdTable::try_from(&config).unwrap_err();
        assert!(err.to_string().contains("exceeds merge threshold"));
    }

    #[test]
    fn missing_mode_is_config_error() {
        let table = ThresholdTable::new()
            .with(EmbeddingMode::NameOnly, ModeThresholds::new(0.9, 0.85).unwrap());
        let err = table.get(EmbeddingMode::NamePlusSummary).unwrap_err();
        assert!(matches!(err, DomainScoutError::Config { .. }));
        assert!(ThresholdTable::new().min_review_threshold().is_none());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.embedding.api_key_env = "DS_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn invalid_endpoint_rejected() {
        let mut config = AppConfig::default();
        config.embedding.endpoint = "not a url".into();
        let err = validate_api_key(&config).unwrap_err();
        assert!(err.to_string().contains("invalid embedding endpoint"));
    }
}
