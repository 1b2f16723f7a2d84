//! SQLite implementation of the core repository and vector index traits.
//!
//! Tables (see [`crate::migrate`]): `documents`, `chunks` and
//! `chunk_vectors`, the latter holding embeddings as little-endian f32
//! BLOBs. Nearest-neighbour search is a brute-force cosine scan over the
//! vectors of active chunks.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docsim_core::embedding::{blob_to_vec, vec_to_blob};
use docsim_core::models::{ChunkType, Document, DocumentChunk, DocumentStatus};
use docsim_core::store::{
    rank_neighbors, ChunkRepository, DocumentRepository, LookupScope, NeighborHit, NeighborQuery,
    StoredVector, VectorIndex,
};

const DOCUMENT_COLUMNS: &str = "id, file_name, content_type, storage_key, binary_hash, text_hash, \
     status, extracted_text, collection_id, created_at, updated_at";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_by_hash(
        &self,
        column: &str,
        hash: &str,
        scope: LookupScope,
    ) -> Result<Option<Document>> {
        let status_filter = match scope {
            LookupScope::Active => "status != 'deleted'",
            LookupScope::Deleted => "status = 'deleted'",
        };
        let sql = format!(
            "SELECT {} FROM documents WHERE {} = ? AND {} ORDER BY created_at, id LIMIT 1",
            DOCUMENT_COLUMNS, column, status_filter
        );
        let row = sqlx::query(&sql)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn set_active(&self, document_id: &str, active: bool) -> Result<u64> {
        let result =
            sqlx::query("UPDATE chunks SET is_active = ? WHERE document_id = ? AND is_active != ?")
                .bind(active)
                .bind(document_id)
                .bind(active)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        file_name: row.get("file_name"),
        content_type: row.get("content_type"),
        storage_key: row.get("storage_key"),
        binary_hash: row.get("binary_hash"),
        text_hash: row.get("text_hash"),
        status: status.parse()?,
        extracted_text: row.get("extracted_text"),
        collection_id: row.get("collection_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<DocumentChunk> {
    let chunk_type: String = row.get("chunk_type");
    let embedding: Option<Vec<u8>> = row.get("embedding");
    Ok(DocumentChunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        content: row.get("content"),
        chunk_index: row.get("chunk_index"),
        chunk_type: chunk_type.parse()?,
        embedding: embedding.map(|b| blob_to_vec(&b)),
        is_active: row.get("is_active"),
    })
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Upsert a vector for an existing chunk, copying its document id.
async fn upsert_vector<'e, E>(executor: E, chunk_id: &str, vector: &[f32]) -> Result<()>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO chunk_vectors (chunk_id, document_id, dims, embedding)
        SELECT id, document_id, ?, ? FROM chunks WHERE id = ?
        ON CONFLICT(chunk_id) DO UPDATE SET
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(vector.len() as i64)
    .bind(vec_to_blob(vector))
    .bind(chunk_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        bail!("chunk not found: {}", chunk_id);
    }
    Ok(())
}

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, file_name, content_type, storage_key, binary_hash,
                                   text_hash, status, extracted_text, collection_id,
                                   created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.file_name)
        .bind(&doc.content_type)
        .bind(&doc.storage_key)
        .bind(&doc.binary_hash)
        .bind(&doc.text_hash)
        .bind(doc.status.as_str())
        .bind(&doc.extracted_text)
        .bind(&doc.collection_id)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    async fn find_by_binary_hash(
        &self,
        hash: &str,
        scope: LookupScope,
    ) -> Result<Option<Document>> {
        self.find_by_hash("binary_hash", hash, scope).await
    }

    async fn find_by_text_hash(&self, hash: &str, scope: LookupScope) -> Result<Option<Document>> {
        self.find_by_hash("text_hash", hash, scope).await
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(now())
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE documents SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(now())
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn associate_hashes(
        &self,
        id: &str,
        text_hash: &str,
        extracted_text: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET text_hash = ?, extracted_text = COALESCE(?, extracted_text), updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(text_hash)
        .bind(extracted_text)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn set_storage_key(&self, id: &str, key: Option<&str>) -> Result<()> {
        let result =
            sqlx::query("UPDATE documents SET storage_key = ?, updated_at = ? WHERE id = ?")
                .bind(key)
                .bind(now())
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            bail!("document not found: {}", id);
        }
        Ok(())
    }

    async fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let rows = match status {
            Some(s) => {
                let sql = format!(
                    "SELECT {} FROM documents WHERE status = ? ORDER BY created_at, id",
                    DOCUMENT_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(s.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM documents ORDER BY created_at, id",
                    DOCUMENT_COLUMNS
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };
        rows.iter().map(document_from_row).collect()
    }
}

#[async_trait]
impl ChunkRepository for SqliteStore {
    async fn save_many(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, chunk_type, content, is_active)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.content)
            .bind(chunk.is_active)
            .execute(&mut *tx)
            .await?;

            if let Some(vector) = &chunk.embedding {
                upsert_vector(&mut *tx, &chunk.id, vector).await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find_by_document_id(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.chunk_type, c.content, c.is_active,
                   v.embedding
            FROM chunks c
            LEFT JOIN chunk_vectors v ON v.chunk_id = c.id
            WHERE c.document_id = ?
            ORDER BY c.chunk_index ASC
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    async fn delete_by_document_id(&self, document_id: &str) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete_by_document_id(&self, document_id: &str) -> Result<u64> {
        self.set_active(document_id, false).await
    }

    async fn restore_by_document_id(&self, document_id: &str) -> Result<u64> {
        self.set_active(document_id, true).await
    }

    async fn count_by_document_id(&self, document_id: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ? AND is_active = 1",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        upsert_vector(&self.pool, chunk_id, vector).await
    }

    async fn update_batch_embeddings(&self, updates: &[(String, Vec<f32>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (chunk_id, vector) in updates {
            // Dropping the transaction on error rolls every update back.
            upsert_vector(&mut *tx, chunk_id, vector).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn has_embedding(&self, chunk_id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE chunk_id = ?")
            .bind(chunk_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        query: &NeighborQuery,
    ) -> Result<Vec<NeighborHit>> {
        let rows = sqlx::query(
            r#"
            SELECT v.chunk_id, v.document_id, c.chunk_type, v.embedding
            FROM chunk_vectors v
            JOIN chunks c ON c.id = v.chunk_id
            WHERE c.is_active = 1
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut loaded = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_type: String = row.get("chunk_type");
            let blob: Vec<u8> = row.get("embedding");
            loaded.push((
                row.get::<String, _>("chunk_id"),
                row.get::<String, _>("document_id"),
                chunk_type
                    .parse::<ChunkType>()
                    .map_err(|e| anyhow!("corrupt chunk row: {}", e))?,
                blob_to_vec(&blob),
            ));
        }

        let stored = loaded
            .iter()
            .map(|(chunk_id, document_id, chunk_type, v)| StoredVector {
                chunk_id,
                document_id,
                chunk_type: *chunk_type,
                vector: v,
            });
        Ok(rank_neighbors(vector, query, stored))
    }
}

/// Whether `err` is SQLite rejecting a duplicate key.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("t.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn chunk(id: &str, doc: &str, index: i64, embedding: Option<Vec<f32>>) -> DocumentChunk {
        DocumentChunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            content: format!("content {}", id),
            chunk_index: index,
            chunk_type: ChunkType::Paragraph,
            embedding,
            is_active: true,
        }
    }

    async fn doc(store: &SqliteStore, hash: &str) -> Document {
        let d = Document::new_uploaded("f.txt", "text/plain", hash);
        store.insert(&d).await.unwrap();
        d
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_scopes() {
        let (_tmp, store) = store().await;
        let d = doc(&store, "bin-1").await;

        let got = store.get(&d.id).await.unwrap().unwrap();
        assert_eq!(got, d);

        assert!(store
            .find_by_binary_hash("bin-1", LookupScope::Active)
            .await
            .unwrap()
            .is_some());
        store
            .update_status(&d.id, DocumentStatus::Deleted)
            .await
            .unwrap();
        assert!(store
            .find_by_binary_hash("bin-1", LookupScope::Active)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_binary_hash("bin-1", LookupScope::Deleted)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_binary_hash_is_unique() {
        let (_tmp, store) = store().await;
        doc(&store, "same").await;
        let dup = Document::new_uploaded("g.txt", "text/plain", "same");
        let err = store.insert(&dup).await.unwrap_err();
        assert!(is_unique_violation(&err));

        let bad = anyhow!("something else");
        assert!(!is_unique_violation(&bad));
    }

    #[tokio::test]
    async fn test_compare_and_set() {
        let (_tmp, store) = store().await;
        let d = doc(&store, "bin-1").await;
        assert!(store
            .compare_and_set_status(&d.id, DocumentStatus::Uploaded, DocumentStatus::Processing)
            .await
            .unwrap());
        assert!(!store
            .compare_and_set_status(&d.id, DocumentStatus::Uploaded, DocumentStatus::Processing)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_text_hash_and_listing() {
        let (_tmp, store) = store().await;
        let d = doc(&store, "bin-1").await;
        store
            .associate_hashes(&d.id, "txt-1", Some("body"))
            .await
            .unwrap();
        // A later call without text keeps the stored text.
        store.associate_hashes(&d.id, "txt-1", None).await.unwrap();

        let found = store
            .find_by_text_hash("txt-1", LookupScope::Active)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.extracted_text.as_deref(), Some("body"));

        assert_eq!(store.list(None).await.unwrap().len(), 1);
        assert!(store
            .list(Some(DocumentStatus::Processed))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_chunks_vectors_and_search() {
        let (_tmp, store) = store().await;
        let a = doc(&store, "a").await;
        let b = doc(&store, "b").await;
        store
            .save_many(&[
                chunk("a0", &a.id, 0, Some(vec![1.0, 0.0])),
                chunk("a1", &a.id, 1, None),
                chunk("b0", &b.id, 0, Some(vec![0.8, 0.6])),
            ])
            .await
            .unwrap();

        let chunks = store.find_by_document_id(&a.id).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].embedding, Some(vec![1.0, 0.0]));
        assert!(chunks[1].embedding.is_none());

        let hits = store
            .nearest_neighbors(&[1.0, 0.0], &NeighborQuery::new(5, 0.5))
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a0", "b0"]);
        assert!((hits[1].similarity - 0.8).abs() < 1e-6);

        store.soft_delete_by_document_id(&b.id).await.unwrap();
        let hits = store
            .nearest_neighbors(&[1.0, 0.0], &NeighborQuery::new(5, 0.5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(store.count_by_document_id(&b.id).await.unwrap(), 0);
        store.restore_by_document_id(&b.id).await.unwrap();
        assert_eq!(store.count_by_document_id(&b.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_batch_embeddings_roll_back_on_missing_chunk() {
        let (_tmp, store) = store().await;
        let a = doc(&store, "a").await;
        store
            .save_many(&[chunk("a0", &a.id, 0, None)])
            .await
            .unwrap();

        let updates = vec![
            ("a0".to_string(), vec![1.0, 0.0]),
            ("ghost".to_string(), vec![1.0, 0.0]),
        ];
        assert!(store.update_batch_embeddings(&updates).await.is_err());
        assert!(!store.has_embedding("a0").await.unwrap());

        store.update_embedding("a0", &[0.0, 1.0]).await.unwrap();
        assert!(store.has_embedding("a0").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_by_document_removes_vectors() {
        let (_tmp, store) = store().await;
        let a = doc(&store, "a").await;
        store
            .save_many(&[chunk("a0", &a.id, 0, Some(vec![1.0]))])
            .await
            .unwrap();
        assert_eq!(store.delete_by_document_id(&a.id).await.unwrap(), 1);
        assert!(!store.has_embedding("a0").await.unwrap());
    }
}
