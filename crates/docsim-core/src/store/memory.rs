//! In-memory store and blob store for tests and embedded use.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity over every active chunk that carries an
//! embedding, through the same [`rank_neighbors`] the SQLite store uses.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::models::{Document, DocumentChunk, DocumentStatus};

use super::{
    rank_neighbors, BlobStore, ChunkRepository, DocumentRepository, LookupScope, NeighborHit,
    NeighborQuery, StoredVector, VectorIndex,
};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

/// Documents, chunks and vectors held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<DocumentChunk>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_by<F>(&self, scope: LookupScope, matches: F) -> Result<Option<Document>>
    where
        F: Fn(&Document) -> bool,
    {
        let docs = read(&self.docs)?;
        let mut found: Vec<&Document> = docs
            .values()
            .filter(|d| scope.admits(d.status) && matches(d))
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found.first().map(|d| (*d).clone()))
    }

    fn with_doc<F>(&self, id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Document),
    {
        let mut docs = write(&self.docs)?;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| anyhow!("document not found: {}", id))?;
        f(doc);
        doc.updated_at = chrono::Utc::now().timestamp();
        Ok(())
    }

    fn set_active(&self, document_id: &str, active: bool) -> Result<u64> {
        let mut chunks = write(&self.chunks)?;
        let mut n = 0;
        for c in chunks.iter_mut().filter(|c| c.document_id == document_id) {
            if c.is_active != active {
                c.is_active = active;
                n += 1;
            }
        }
        Ok(n)
    }
}

#[async_trait]
impl DocumentRepository for InMemoryStore {
    async fn insert(&self, doc: &Document) -> Result<()> {
        let mut docs = write(&self.docs)?;
        if docs.contains_key(&doc.id) {
            bail!("document {} already exists", doc.id);
        }
        if docs.values().any(|d| d.binary_hash == doc.binary_hash) {
            bail!("binary hash {} already stored", doc.binary_hash);
        }
        docs.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Document>> {
        Ok(read(&self.docs)?.get(id).cloned())
    }

    async fn find_by_binary_hash(
        &self,
        hash: &str,
        scope: LookupScope,
    ) -> Result<Option<Document>> {
        self.find_by(scope, |d| d.binary_hash == hash)
    }

    async fn find_by_text_hash(&self, hash: &str, scope: LookupScope) -> Result<Option<Document>> {
        self.find_by(scope, |d| d.text_hash.as_deref() == Some(hash))
    }

    async fn update_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        self.with_doc(id, |d| d.status = status)
    }

    async fn compare_and_set_status(
        &self,
        id: &str,
        expected: DocumentStatus,
        next: DocumentStatus,
    ) -> Result<bool> {
        let mut docs = write(&self.docs)?;
        match docs.get_mut(id) {
            Some(doc) if doc.status == expected => {
                doc.status = next;
                doc.updated_at = chrono::Utc::now().timestamp();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn associate_hashes(
        &self,
        id: &str,
        text_hash: &str,
        extracted_text: Option<&str>,
    ) -> Result<()> {
        self.with_doc(id, |d| {
            d.text_hash = Some(text_hash.to_string());
            if let Some(text) = extracted_text {
                d.extracted_text = Some(text.to_string());
            }
        })
    }

    async fn set_storage_key(&self, id: &str, key: Option<&str>) -> Result<()> {
        self.with_doc(id, |d| d.storage_key = key.map(str::to_string))
    }

    async fn list(&self, status: Option<DocumentStatus>) -> Result<Vec<Document>> {
        let docs = read(&self.docs)?;
        let mut out: Vec<Document> = docs
            .values()
            .filter(|d| status.map_or(true, |s| d.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl ChunkRepository for InMemoryStore {
    async fn save_many(&self, chunks: &[DocumentChunk]) -> Result<()> {
        let mut stored = write(&self.chunks)?;
        for c in chunks {
            if stored.iter().any(|s| s.id == c.id) {
                bail!("chunk {} already exists", c.id);
            }
        }
        stored.extend(chunks.iter().cloned());
        Ok(())
    }

    async fn find_by_document_id(&self, document_id: &str) -> Result<Vec<DocumentChunk>> {
        let stored = read(&self.chunks)?;
        let mut out: Vec<DocumentChunk> = stored
            .iter()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.chunk_index);
        Ok(out)
    }

    async fn delete_by_document_id(&self, document_id: &str) -> Result<u64> {
        let mut stored = write(&self.chunks)?;
        let before = stored.len();
        stored.retain(|c| c.document_id != document_id);
        Ok((before - stored.len()) as u64)
    }

    async fn soft_delete_by_document_id(&self, document_id: &str) -> Result<u64> {
        self.set_active(document_id, false)
    }

    async fn restore_by_document_id(&self, document_id: &str) -> Result<u64> {
        self.set_active(document_id, true)
    }

    async fn count_by_document_id(&self, document_id: &str) -> Result<usize> {
        Ok(read(&self.chunks)?
            .iter()
            .filter(|c| c.document_id == document_id && c.is_active)
            .count())
    }

    async fn update_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        let mut stored = write(&self.chunks)?;
        let chunk = stored
            .iter_mut()
            .find(|c| c.id == chunk_id)
            .ok_or_else(|| anyhow!("chunk not found: {}", chunk_id))?;
        chunk.embedding = Some(vector.to_vec());
        Ok(())
    }

    async fn update_batch_embeddings(&self, updates: &[(String, Vec<f32>)]) -> Result<()> {
        let mut stored = write(&self.chunks)?;
        // Validate everything first so a bad id leaves no partial writes.
        let mut positions = Vec::with_capacity(updates.len());
        for (chunk_id, _) in updates {
            let pos = stored
                .iter()
                .position(|c| &c.id == chunk_id)
                .ok_or_else(|| anyhow!("chunk not found: {}", chunk_id))?;
            positions.push(pos);
        }
        for (pos, (_, vector)) in positions.into_iter().zip(updates) {
            stored[pos].embedding = Some(vector.clone());
        }
        Ok(())
    }

    async fn has_embedding(&self, chunk_id: &str) -> Result<bool> {
        Ok(read(&self.chunks)?
            .iter()
            .any(|c| c.id == chunk_id && c.embedding.is_some()))
    }
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn nearest_neighbors(
        &self,
        vector: &[f32],
        query: &NeighborQuery,
    ) -> Result<Vec<NeighborHit>> {
        let stored = read(&self.chunks)?;
        let rows = stored.iter().filter(|c| c.is_active).filter_map(|c| {
            c.embedding.as_deref().map(|v| StoredVector {
                chunk_id: &c.id,
                document_id: &c.document_id,
                chunk_type: c.chunk_type,
                vector: v,
            })
        });
        Ok(rank_neighbors(vector, query, rows))
    }
}

/// Key/value blob storage in process memory.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = read(&self.blobs)?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(write(&self.blobs)?.remove(key))
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(read(&self.blobs)?.contains_key(key))
    }

    async fn download_bytes(&self, key: &str) -> Result<Vec<u8>> {
        read(&self.blobs)?
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("blob not found: {}", key))
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        write(&self.blobs)?.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn move_file(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let mut blobs = write(&self.blobs)?;
        let bytes = blobs
            .remove(src_key)
            .ok_or_else(|| anyhow!("blob not found: {}", src_key))?;
        blobs.insert(dst_key.to_string(), bytes);
        Ok(())
    }
}
