//! Tokenization caches keyed by text hash and model. Entries are pure
//! functions of their key, so pipeline runs never clear them.

use domainscout_shared::{Result, TokenizationMode};
use libsql::params;

use crate::{Storage, db_err};

/// A cached token count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedTokenCount {
    pub token_count: u32,
    pub tokenization_mode: TokenizationMode,
}

/// A cached truncation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedTruncation {
    pub truncated_text: String,
    pub tokenization_mode: TokenizationMode,
}

/// `token_count_cache` and `trunc_text_cache`.
pub struct TokenCacheRepo<'a> {
    storage: &'a Storage,
}

impl<'a> TokenCacheRepo<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn get_token_count(
        &self,
        text_hash: &str,
        model_name: &str,
    ) -> Result<Option<CachedTokenCount>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT token_count, tokenization_mode FROM token_count_cache
                 WHERE text_hash = ?1 AND model_name = ?2",
                params![text_hash, model_name],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let mode: String = row.get(1).map_err(db_err)?;
        Ok(Some(CachedTokenCount {
            token_count: row.get::<u32>(0).map_err(db_err)?,
            tokenization_mode: mode.parse()?,
        }))
    }

    pub async fn set_token_count(
        &self,
        text_hash: &str,
        model_name: &str,
        entry: CachedTokenCount,
    ) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO token_count_cache
                   (text_hash, model_name, token_count, tokenization_mode)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    text_hash,
                    model_name,
                    i64::from(entry.token_count),
                    entry.tokenization_mode.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn get_truncation(
        &self,
        text_hash: &str,
        model_name: &str,
        max_tokens: usize,
    ) -> Result<Option<CachedTruncation>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT truncated_text, tokenization_mode FROM trunc_text_cache
                 WHERE text_hash = ?1 AND model_name = ?2 AND max_tokens = ?3",
                params![text_hash, model_name, max_tokens as i64],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.next().await.map_err(db_err)? else {
            return Ok(None);
        };
        let mode: String = row.get(1).map_err(db_err)?;
        Ok(Some(CachedTruncation {
            truncated_text: row.get(0).map_err(db_err)?,
            tokenization_mode: mode.parse()?,
        }))
    }

    pub async fn set_truncation(
        &self,
        text_hash: &str,
        model_name: &str,
        max_tokens: usize,
        entry: &CachedTruncation,
    ) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT OR REPLACE INTO trunc_text_cache
                   (text_hash, model_name, max_tokens, truncated_text, tokenization_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    text_hash,
                    model_name,
                    max_tokens as i64,
                    entry.truncated_text.as_str(),
                    entry.tokenization_mode.as_str(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::test_storage;

    #[tokio::test]
    async fn token_counts_are_keyed_by_model() {
        let storage = test_storage().await;
        let cache = storage.token_cache();
        let entry = CachedTokenCount {
            token_count: 12,
            tokenization_mode: TokenizationMode::Exact,
        };
        cache.set_token_count("h1", "model-a", entry).await.unwrap();

        assert_eq!(cache.get_token_count("h1", "model-a").await.unwrap(), Some(entry));
        assert_eq!(cache.get_token_count("h1", "model-b").await.unwrap(), None);

        let replaced = CachedTokenCount {
            token_count: 3,
            tokenization_mode: TokenizationMode::Approx,
        };
        cache.set_token_count("h1", "model-a", replaced).await.unwrap();
        assert_eq!(cache.get_token_count("h1", "model-a").await.unwrap(), Some(replaced));
    }

    #[tokio::test]
    async fn truncations_are_keyed_by_budget_and_survive_clear() {
        let storage = test_storage().await;
        let cache = storage.token_cache();
        let entry = CachedTruncation {
            truncated_text: "Payments handle".into(),
            tokenization_mode: TokenizationMode::Exact,
        };
        cache.set_truncation("h1", "model-a", 3, &entry).await.unwrap();

        assert!(cache.get_truncation("h1", "model-a", 4).await.unwrap().is_none());
        storage.derived().clear().await.unwrap();
        assert_eq!(
            cache.get_truncation("h1", "model-a", 3).await.unwrap(),
            Some(entry)
        );
    }
}
