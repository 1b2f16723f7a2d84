//! Document retrieval by ID (`docsim get`).

use anyhow::{bail, Result};
use docsim_core::store::{ChunkRepository, DocumentRepository};
use serde::Serialize;

use crate::config::Config;
use crate::services::Services;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentResponse {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub status: String,
    pub collection_id: Option<String>,
    pub storage_key: Option<String>,
    pub binary_hash: String,
    pub text_hash: Option<String>,
    pub created_at: String, // ISO8601
    pub updated_at: String, // ISO8601
    pub chunks: Vec<ChunkResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkResponse {
    pub index: i64,
    pub chunk_type: String,
    pub active: bool,
    pub embedded: bool,
    pub text: String,
}

pub async fn get_document(services: &Services, id: &str) -> Result<DocumentResponse> {
    let doc = match services.store.get(id).await? {
        Some(doc) => doc,
        None => bail!("document not found: {}", id),
    };
    let chunks = services.store.find_by_document_id(id).await?;

    Ok(DocumentResponse {
        id: doc.id,
        file_name: doc.file_name,
        content_type: doc.content_type,
        status: doc.status.to_string(),
        collection_id: doc.collection_id,
        storage_key: doc.storage_key,
        binary_hash: doc.binary_hash,
        text_hash: doc.text_hash,
        created_at: format_ts_iso(doc.created_at),
        updated_at: format_ts_iso(doc.updated_at),
        chunks: chunks
            .into_iter()
            .map(|c| ChunkResponse {
                index: c.chunk_index,
                chunk_type: c.chunk_type.as_str().to_string(),
                active: c.is_active,
                embedded: c.embedding.is_some(),
                text: c.content,
            })
            .collect(),
    })
}

/// CLI entry point: print the document and its chunks to stdout.
pub async fn run_get(config: &Config, id: &str) -> Result<()> {
    let services = Services::open(config).await?;
    let result = get_document(&services, id).await;
    services.close().await;
    let doc = result?;

    println!("--- Document ---");
    println!("id:           {}", doc.id);
    println!("file_name:    {}", doc.file_name);
    println!("content_type: {}", doc.content_type);
    println!("status:       {}", doc.status);
    if let Some(ref c) = doc.collection_id {
        println!("collection:   {}", c);
    }
    if let Some(ref key) = doc.storage_key {
        println!("storage_key:  {}", key);
    }
    println!("binary_hash:  {}", doc.binary_hash);
    println!(
        "text_hash:    {}",
        doc.text_hash.as_deref().unwrap_or("(not extracted)")
    );
    println!("created_at:   {}", doc.created_at);
    println!("updated_at:   {}", doc.updated_at);
    println!();

    println!("--- Chunks ({}) ---", doc.chunks.len());
    for chunk in &doc.chunks {
        let mut flags = Vec::new();
        if !chunk.active {
            flags.push("inactive");
        }
        if !chunk.embedded {
            flags.push("no embedding");
        }
        if flags.is_empty() {
            println!("[chunk {} {}]", chunk.index, chunk.chunk_type);
        } else {
            println!(
                "[chunk {} {}; {}]",
                chunk.index,
                chunk.chunk_type,
                flags.join(", ")
            );
        }
        println!("{}", chunk.text);
        println!();
    }

    Ok(())
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
