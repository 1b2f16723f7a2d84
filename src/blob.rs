//! Filesystem blob storage.
//!
//! Keys are relative, `/`-separated paths under a root directory. Keys
//! that try to escape the root are rejected.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use docsim_core::store::BlobStore;

pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key.trim_start_matches('/'));
        if key.trim().is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            bail!("invalid blob key: {:?}", key);
        }
        Ok(self.root.join(rel))
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn download_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read blob {}", key))
    }

    async fn upload_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        ensure_parent(&path).await?;
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write blob {}", key))
    }

    async fn move_file(&self, src_key: &str, dst_key: &str) -> Result<()> {
        let src = self.resolve(src_key)?;
        let dst = self.resolve(dst_key)?;
        if !tokio::fs::try_exists(&src).await? {
            bail!("blob not found: {}", src_key);
        }
        ensure_parent(&dst).await?;
        tokio::fs::rename(&src, &dst)
            .await
            .with_context(|| format!("Failed to move blob {} -> {}", src_key, dst_key))
    }
}
