//! Database statistics (`docsim stats`).
//!
//! Document counts per status, active and inactive chunks, and embedding
//! coverage over active chunks.

use anyhow::Result;
use docsim_core::models::DocumentStatus;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// `(status, count)` for every status, in lifecycle order.
    pub by_status: Vec<(DocumentStatus, i64)>,
    pub active_chunks: i64,
    pub inactive_chunks: i64,
    /// Active chunks that have a vector.
    pub embedded_chunks: i64,
}

impl Stats {
    pub fn total_documents(&self) -> i64 {
        self.by_status.iter().map(|(_, n)| n).sum()
    }

    pub fn count(&self, status: DocumentStatus) -> i64 {
        self.by_status
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<Stats> {
    let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM documents GROUP BY status")
        .fetch_all(pool)
        .await?;
    let mut counts = std::collections::HashMap::new();
    for row in &rows {
        let status: String = row.get("status");
        counts.insert(status.parse::<DocumentStatus>()?, row.get::<i64, _>("n"));
    }
    let by_status = DocumentStatus::ALL
        .iter()
        .map(|s| (*s, counts.get(s).copied().unwrap_or(0)))
        .collect();

    let active_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE is_active = 1")
            .fetch_one(pool)
            .await?;
    let inactive_chunks: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE is_active = 0")
            .fetch_one(pool)
            .await?;
    let embedded_chunks: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM chunk_vectors v JOIN chunks c ON c.id = v.chunk_id WHERE c.is_active = 1",
    )
    .fetch_one(pool)
    .await?;

    Ok(Stats {
        by_status,
        active_chunks,
        inactive_chunks,
        embedded_chunks,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::run_migrations(&pool).await?;
    let stats = collect_stats(&pool).await;
    pool.close().await;
    let stats = stats?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docsim Database Stats");
    println!("=====================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.total_documents());
    for (status, n) in &stats.by_status {
        println!("    {:<12} {:>6}", status.as_str(), n);
    }
    println!();
    println!(
        "  Chunks:      {} active, {} inactive",
        stats.active_chunks, stats.inactive_chunks
    );
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_chunks,
        stats.active_chunks,
        if stats.active_chunks > 0 {
            (stats.embedded_chunks * 100) / stats.active_chunks
        } else {
            0
        }
    );
    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_store::SqliteStore;
    use docsim_core::models::{ChunkType, Document, DocumentChunk};
    use docsim_core::store::{ChunkRepository, DocumentRepository};
    use tempfile::TempDir;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn test_counts() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("s.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let store = SqliteStore::new(pool.clone());

        let a = Document::new_uploaded("a.txt", "text/plain", "h1");
        let b = Document::new_uploaded("b.txt", "text/plain", "h2");
        store.insert(&a).await.unwrap();
        store.insert(&b).await.unwrap();
        store
            .update_status(&b.id, DocumentStatus::Deleted)
            .await
            .unwrap();

        let chunk = |id: &str, doc: &str, index: i64, v: Option<Vec<f32>>| DocumentChunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            content: "text".to_string(),
            chunk_index: index,
            chunk_type: ChunkType::Paragraph,
            embedding: v,
            is_active: true,
        };
        store
            .save_many(&[
                chunk("a0", &a.id, 0, Some(vec![1.0])),
                chunk("a1", &a.id, 1, None),
                chunk("b0", &b.id, 0, Some(vec![1.0])),
            ])
            .await
            .unwrap();
        store.soft_delete_by_document_id(&b.id).await.unwrap();

        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.total_documents(), 2);
        assert_eq!(stats.count(DocumentStatus::Uploaded), 1);
        assert_eq!(stats.count(DocumentStatus::Deleted), 1);
        assert_eq!(stats.active_chunks, 2);
        assert_eq!(stats.inactive_chunks, 1);
        assert_eq!(stats.embedded_chunks, 1);
    }
}
