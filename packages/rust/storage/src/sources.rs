//! Source region: registered documents and their parsed content blocks.

use domainscout_shared::{BlockType, ContentBlock, Result, SourceDocument};
use libsql::params;

use crate::{Storage, db_err, parse_timestamp};

/// Repository over `pdfs` and `content_blocks`.
pub struct SourceRepo<'a> {
    storage: &'a Storage,
}

impl<'a> SourceRepo<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Register a document.
    pub async fn insert_document(&self, doc: &SourceDocument) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute(
                "INSERT INTO pdfs (pdf_id, file_path, checksum, ingested_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    doc.pdf_id.as_str(),
                    doc.file_path.as_str(),
                    doc.checksum.as_str(),
                    doc.ingested_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a document by ID.
    pub async fn get_document(&self, pdf_id: &str) -> Result<Option<SourceDocument>> {
        self.query_one(
            "SELECT pdf_id, file_path, checksum, ingested_at FROM pdfs WHERE pdf_id = ?1",
            pdf_id,
        )
        .await
    }

    /// Find a previously imported document with the same content checksum.
    pub async fn find_by_checksum(&self, checksum: &str) -> Result<Option<SourceDocument>> {
        self.query_one(
            "SELECT pdf_id, file_path, checksum, ingested_at FROM pdfs WHERE checksum = ?1 LIMIT 1",
            checksum,
        )
        .await
    }

    /// List all documents ordered by ID.
    pub async fn list_documents(&self) -> Result<Vec<SourceDocument>> {
        self.query_many(
            "SELECT pdf_id, file_path, checksum, ingested_at FROM pdfs ORDER BY pdf_id",
        )
        .await
    }

    /// List documents that have at least one content block, ordered by ID.
    pub async fn list_documents_with_blocks(&self) -> Result<Vec<SourceDocument>> {
        self.query_many(
            "SELECT DISTINCT p.pdf_id, p.file_path, p.checksum, p.ingested_at
             FROM pdfs p
             JOIN content_blocks b ON b.pdf_id = p.pdf_id
             ORDER BY p.pdf_id",
        )
        .await
    }

    /// Insert parsed blocks. Returns the number written.
    pub async fn insert_blocks(&self, blocks: &[ContentBlock]) -> Result<usize> {
        self.storage.check_writable()?;
        for block in blocks {
            self.storage
                .conn
                .execute(
                    "INSERT INTO content_blocks
                       (block_id, pdf_id, section_path, heading_level, block_type, text, page_index, position_index)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        block.block_id.as_str(),
                        block.pdf_id.as_str(),
                        block.section_path.as_str(),
                        block.heading_level,
                        block.block_type.as_str(),
                        block.text.as_str(),
                        block.page_index,
                        block.position_index,
                    ],
                )
                .await
                .map_err(db_err)?;
        }
        Ok(blocks.len())
    }

    /// Blocks for one document in reading order.
    pub async fn list_blocks(&self, pdf_id: &str) -> Result<Vec<ContentBlock>> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT block_id, pdf_id, section_path, heading_level, block_type, text, page_index, position_index
                 FROM content_blocks WHERE pdf_id = ?1
                 ORDER BY position_index, block_id",
                params![pdf_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let block_type: String = row.get(4).map_err(db_err)?;
            results.push(ContentBlock {
                block_id: row.get(0).map_err(db_err)?,
                pdf_id: row.get(1).map_err(db_err)?,
                section_path: row.get::<String>(2).unwrap_or_default(),
                heading_level: row.get::<i64>(3).unwrap_or(0),
                block_type: block_type.parse().unwrap_or(BlockType::Other),
                text: row.get(5).map_err(db_err)?,
                page_index: row.get::<i64>(6).unwrap_or(0),
                position_index: row.get::<i64>(7).unwrap_or(0),
            });
        }
        Ok(results)
    }

    /// Whether any blocks exist for the document.
    pub async fn has_blocks(&self, pdf_id: &str) -> Result<bool> {
        let mut rows = self
            .storage
            .conn
            .query(
                "SELECT 1 FROM content_blocks WHERE pdf_id = ?1 LIMIT 1",
                params![pdf_id],
            )
            .await
            .map_err(db_err)?;
        Ok(rows.next().await.map_err(db_err)?.is_some())
    }

    /// Remove a document and its blocks. Derived state is left for the next run to rebuild.
    pub async fn delete_document(&self, pdf_id: &str) -> Result<()> {
        self.storage.check_writable()?;
        self.storage
            .conn
            .execute("DELETE FROM content_blocks WHERE pdf_id = ?1", params![pdf_id])
            .await
            .map_err(db_err)?;
        self.storage
            .conn
            .execute("DELETE FROM pdfs WHERE pdf_id = ?1", params![pdf_id])
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn query_one(&self, sql: &str, key: &str) -> Result<Option<SourceDocument>> {
        let mut rows = self
            .storage
            .conn
            .query(sql, params![key])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_document(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn query_many(&self, sql: &str) -> Result<Vec<SourceDocument>> {
        let mut rows = self
            .storage
            .conn
            .query(sql, params![])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            results.push(row_to_document(&row)?);
        }
        Ok(results)
    }
}

fn row_to_document(row: &libsql::Row) -> Result<SourceDocument> {
    let ingested_at: String = row.get(3).map_err(db_err)?;
    Ok(SourceDocument {
        pdf_id: row.get(0).map_err(db_err)?,
        file_path: row.get(1).map_err(db_err)?,
        checksum: row.get(2).map_err(db_err)?,
        ingested_at: parse_timestamp(&ingested_at)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domainscout_shared::{BlockType, ContentBlock, SourceDocument};

    use crate::test_support::test_storage;

    fn doc(pdf_id: &str, checksum: &str) -> SourceDocument {
        SourceDocument {
            pdf_id: pdf_id.into(),
            file_path: format!("/docs/{pdf_id}.pdf"),
            checksum: checksum.into(),
            ingested_at: Utc::now(),
        }
    }

    fn block(pdf_id: &str, idx: i64, block_type: BlockType, text: &str) -> ContentBlock {
        ContentBlock {
            block_id: format!("{pdf_id}_b{idx:05}"),
            pdf_id: pdf_id.into(),
            section_path: String::new(),
            heading_level: 1,
            block_type,
            text: text.into(),
            page_index: 0,
            position_index: idx,
        }
    }

    #[tokio::test]
    async fn document_crud() {
        let storage = test_storage().await;
        let sources = storage.sources();

        sources.insert_document(&doc("p1", "abc")).await.expect("insert");
        let found = sources.get_document("p1").await.expect("get").expect("present");
        assert_eq!(found.file_path, "/docs/p1.pdf");

        let by_checksum = sources.find_by_checksum("abc").await.unwrap();
        assert_eq!(by_checksum.map(|d| d.pdf_id).as_deref(), Some("p1"));
        assert!(sources.find_by_checksum("zzz").await.unwrap().is_none());

        sources.delete_document("p1").await.expect("delete");
        assert!(sources.list_documents().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocks_listed_in_position_order() {
        let storage = test_storage().await;
        let sources = storage.sources();
        sources.insert_document(&doc("p1", "abc")).await.unwrap();
        sources.insert_document(&doc("p2", "def")).await.unwrap();

        let blocks = vec![
            block("p1", 2, BlockType::Paragraph, "Domain: Billing"),
            block("p1", 0, BlockType::Heading, "Payments"),
            block("p1", 1, BlockType::Other, "| table |"),
        ];
        assert_eq!(sources.insert_blocks(&blocks).await.unwrap(), 3);

        let listed = sources.list_blocks("p1").await.expect("list");
        let positions: Vec<i64> = listed.iter().map(|b| b.position_index).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert_eq!(listed[1].block_type, BlockType::Other);

        assert!(sources.has_blocks("p1").await.unwrap());
        assert!(!sources.has_blocks("p2").await.unwrap());

        let with_blocks = sources.list_documents_with_blocks().await.unwrap();
        assert_eq!(with_blocks.len(), 1);
        assert_eq!(with_blocks[0].pdf_id, "p1");
    }

    #[tokio::test]
    async fn delete_document_removes_blocks() {
        let storage = test_storage().await;
        let sources = storage.sources();
        sources.insert_document(&doc("p1", "abc")).await.unwrap();
        sources
            .insert_blocks(&[block("p1", 0, BlockType::Heading, "Risk")])
            .await
            .unwrap();

        sources.delete_document("p1").await.unwrap();
        assert!(!sources.has_blocks("p1").await.unwrap());
    }
}
