//! Turso Embedded / libSQL storage layer for domainscout.
//!
//! The [`Storage`] struct wraps a libSQL database and hands out three
//! repositories with distinct lifecycle contracts:
//! - [`SourceRepo`] via [`Storage::sources`]: imported documents and their
//!   parsed content blocks.
//! - [`DerivedRepo`] via [`Storage::derived`]: everything a pipeline run
//!   computes. Always safe to truncate and recompute.
//! - [`CuratedRepo`] via [`Storage::curated`]: the human review queue. There
//!   is no truncate operation for it.
//! - [`TokenCacheRepo`] via [`Storage::token_cache`]: token counts and
//!   truncated texts, kept across runs.
//!
//! Every write commits on its own; there are no cross-table transactions.

mod cache;
mod curated;
mod derived;
mod migrations;
mod sources;

use std::path::Path;

use chrono::{DateTime, Utc};
use domainscout_shared::{DomainScoutError, Result};
use libsql::{Connection, Database, params};

pub use cache::{CachedTokenCount, CachedTruncation, TokenCacheRepo};
pub use curated::CuratedRepo;
pub use derived::{CandidateEmbedding, DerivedRepo, DomainEmbedding, parse_vector, serialize_vector};
pub use sources::SourceRepo;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| DomainScoutError::io(parent, e))?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DomainScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DomainScoutError::Storage(e.to_string()))?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (listing commands).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DomainScoutError::Storage(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| DomainScoutError::Storage(e.to_string()))?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Imported documents and content blocks.
    pub fn sources(&self) -> SourceRepo<'_> {
        SourceRepo::new(self)
    }

    /// Recomputable pipeline output.
    pub fn derived(&self) -> DerivedRepo<'_> {
        DerivedRepo::new(self)
    }

    /// Human review decisions.
    pub fn curated(&self) -> CuratedRepo<'_> {
        CuratedRepo::new(self)
    }

    /// Tokenization caches.
    pub fn token_cache(&self) -> TokenCacheRepo<'_> {
        TokenCacheRepo::new(self)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn
                    .execute_batch(migration.sql)
                    .await
                    .map_err(|e| {
                        DomainScoutError::Storage(format!(
                            "migration v{} failed: {e}",
                            migration.version
                        ))
                    })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DomainScoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }
}

/// Parse an RFC 3339 timestamp column.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainScoutError::Storage(format!("invalid date '{s}': {e}")))
}

/// Map a libSQL error into the storage variant.
fn db_err(e: libsql::Error) -> DomainScoutError {
    DomainScoutError::Storage(e.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Storage;
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    pub(crate) async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }
}
