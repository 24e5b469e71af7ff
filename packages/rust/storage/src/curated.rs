//! Curated region: the human review queue.
//!
//! Rows here survive every pipeline run. New items are added; existing ones
//! are only ever resolved.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use domainscout_shared::{DomainScoutError, Result, ReviewItem, ReviewStatus};
use libsql::params;

use crate::{Storage, db_err, parse_timestamp};

const REVIEW_COLUMNS: &str =
    "review_id, candidate_a_id, candidate_b_id, similarity, reason, status, created_at, resolved_at";

/// Repository over `review_queue`.
pub struct CuratedRepo<'a> {
    storage: &'a Storage,
}

impl<'a> CuratedRepo<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Queue a new review item.
    pub async fn insert_review_item(&self, item: &ReviewItem) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT INTO review_queue
                   (review_id, candidate_a_id, candidate_b_id, similarity, reason, status, created_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    item.review_id.as_str(),
                    item.candidate_a_id.as_str(),
                    item.candidate_b_id.as_str(),
                    item.similarity,
                    item.reason.as_str(),
                    item.status.as_str(),
                    item.created_at.to_rfc3339(),
                    item.resolved_at.map(|t| t.to_rfc3339()),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Whether any review item (in any status) exists for the pair, in either order.
    pub async fn has_review_pair(&self, a: &str, b: &str) -> Result<bool> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT 1 FROM review_queue
                 WHERE (candidate_a_id = ?1 AND candidate_b_id = ?2)
                    OR (candidate_a_id = ?2 AND candidate_b_id = ?1)
                 LIMIT 1",
                params![a, b],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    pub async fn get_review(&self, review_id: &str) -> Result<Option<ReviewItem>> {
        let sql = format!("SELECT {REVIEW_COLUMNS} FROM review_queue WHERE review_id = ?1");
        let mut rows = self
            .storage
            .conn
            .query(&sql, params![review_id])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_review(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Review items, optionally filtered by status, oldest first.
    pub async fn list_reviews(&self, status: Option<ReviewStatus>) -> Result<Vec<ReviewItem>> {
        let mut rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {REVIEW_COLUMNS} FROM review_queue WHERE status = ?1
                     ORDER BY created_at, review_id"
                );
                self.storage
                    .conn
                    .query(&sql, params![status.as_str()])
                    .await
            }
            None => {
                let sql =
                    format!("SELECT {REVIEW_COLUMNS} FROM review_queue ORDER BY created_at, review_id");
                self.storage.conn.query(&sql, params![]).await
            }
        }
        .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_review(&row)?);
        }
        Ok(results)
    }

    pub async fn list_pending_reviews(&self) -> Result<Vec<ReviewItem>> {
        self.list_reviews(Some(ReviewStatus::Pending)).await
    }

    /// Pairs a human has rejected, as stored (callers check both orders).
    pub async fn list_rejected_pairs(&self) -> Result<HashSet<(String, String)>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT candidate_a_id, candidate_b_id FROM review_queue WHERE status = ?1",
                params![ReviewStatus::Rejected.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut pairs = HashSet::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            pairs.insert((row.get(0).map_err(db_err)?, row.get(1).map_err(db_err)?));
        }
        Ok(pairs)
    }

    /// Record a human decision on a review item.
    pub async fn resolve_review(
        &self,
        review_id: &str,
        status: ReviewStatus,
        resolved_at: DateTime<Utc>,
    ) -> Result<()> {
        self.storage.check_writable()?;
        if status == ReviewStatus::Pending {
            return Err(DomainScoutError::validation(
                "a review can only be resolved as accepted or rejected",
            ));
        }

        let updated = self
            .storage
            .conn
            .execute(
                "UPDATE review_queue SET status = ?1, resolved_at = ?2 WHERE review_id = ?3",
                params![status.as_str(), resolved_at.to_rfc3339(), review_id],
            )
            .await
            .map_err(db_err)?;

        if updated == 0 {
            return Err(DomainScoutError::validation(format!(
                "review item not found: {review_id}"
            )));
        }
        tracing::info!(review_id, status = %status, "review resolved");
        Ok(())
    }
}

fn row_to_review(row: &libsql::Row) -> Result<ReviewItem> {
    let status: String = row.get(5).map_err(db_err)?;
    let created_at: String = row.get(6).map_err(db_err)?;
    let resolved_at = match row.get::<Option<String>>(7).map_err(db_err)? {
        Some(ts) => Some(parse_timestamp(&ts)?),
        None => None,
    };

    Ok(ReviewItem {
        review_id: row.get(0).map_err(db_err)?,
        candidate_a_id: row.get(1).map_err(db_err)?,
        candidate_b_id: row.get(2).map_err(db_err)?,
        similarity: row.get::<f64>(3).map_err(db_err)?,
        reason: row.get(4).map_err(db_err)?,
        status: status.parse()?,
        created_at: parse_timestamp(&created_at)?,
        resolved_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_support::test_storage;

    fn item(id: &str, a: &str, b: &str) -> ReviewItem {
        ReviewItem {
            review_id: id.into(),
            candidate_a_id: a.into(),
            candidate_b_id: b.into(),
            similarity: 0.87,
            reason: "name_only_review_band".into(),
            status: ReviewStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[tokio::test]
    async fn pair_lookup_is_order_independent() {
        let storage = test_storage().await;
        let curated = storage.curated();
        curated.insert_review_item(&item("review_1", "c1", "c2")).await.unwrap();

        assert!(curated.has_review_pair("c1", "c2").await.unwrap());
        assert!(curated.has_review_pair("c2", "c1").await.unwrap());
        assert!(!curated.has_review_pair("c1", "c3").await.unwrap());
    }

    #[tokio::test]
    async fn resolve_moves_item_out_of_pending() {
        let storage = test_storage().await;
        let curated = storage.curated();
        curated.insert_review_item(&item("review_1", "c1", "c2")).await.unwrap();
        curated.insert_review_item(&item("review_2", "c3", "c4")).await.unwrap();

        curated
            .resolve_review("review_1", ReviewStatus::Rejected, Utc::now())
            .await
            .expect("resolve");

        let pending = curated.list_pending_reviews().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].review_id, "review_2");

        let resolved = curated.get_review("review_1").await.unwrap().expect("present");
        assert_eq!(resolved.status, ReviewStatus::Rejected);
        assert!(resolved.resolved_at.is_some());

        let rejected = curated.list_rejected_pairs().await.unwrap();
        assert!(rejected.contains(&("c1".to_string(), "c2".to_string())));
        assert_eq!(curated.list_reviews(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn resolve_rejects_bad_input() {
        let storage = test_storage().await;
        let curated = storage.curated();
        curated.insert_review_item(&item("review_1", "c1", "c2")).await.unwrap();

        let pending = curated
            .resolve_review("review_1", ReviewStatus::Pending, Utc::now())
            .await;
        assert!(pending.is_err());

        let missing = curated
            .resolve_review("review_missing", ReviewStatus::Accepted, Utc::now())
            .await;
        assert!(missing.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn row_errors_are_not_treated_as_end_of_results() {
        let storage = test_storage().await;
        // abs() of i64::MIN fails while the second row is stepped.
        storage
            .conn
            .execute_batch(
                "DROP TABLE review_queue;
                 CREATE TABLE review_source (a TEXT, b TEXT, n INTEGER);
                 INSERT INTO review_source VALUES ('c1', 'c2', 1), ('c3', 'c4', -9223372036854775807 - 1);
                 CREATE VIEW review_queue AS
                     SELECT a AS candidate_a_id, b AS candidate_b_id, 'rejected' AS status
                     FROM review_source WHERE abs(n) > 0;",
            )
            .await
            .unwrap();

        let curated = storage.curated();
        assert!(curated.list_rejected_pairs().await.is_err());
        assert!(curated.has_review_pair("c3", "c4").await.is_err());
    }

    #[tokio::test]
    async fn survives_derived_clear() {
        let storage = test_storage().await;
        storage
            .curated()
            .insert_review_item(&item("review_1", "c1", "c2"))
            .await
            .unwrap();
        storage.derived().clear().await.unwrap();
        assert_eq!(storage.curated().list_reviews(None).await.unwrap().len(), 1);
    }
}
