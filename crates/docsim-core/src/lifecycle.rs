//! Document status state machine, soft delete and restore.
//!
//! Every status change goes through [`DocumentLifecycle::transition`], which
//! checks the transition table in [`DocumentStatus::allowed_transitions`]
//! and then writes with a compare-and-set on the previous status. Two
//! workers racing to move the same document therefore cannot both win: the
//! loser gets [`DocsimError::Conflict`].
//!
//! Soft delete never removes rows. The document becomes `Deleted`, its
//! chunks become inactive (invisible to vector search) and its file is
//! moved under the deleted prefix. Restore reverses all three.

use tracing::{info, warn};

use crate::error::{DocsimError, Result, Step, StepContext};
use crate::models::{Document, DocumentStatus};
use crate::store::Backends;

#[derive(Clone)]
pub struct DocumentLifecycle {
    backends: Backends,
    deleted_prefix: String,
}

impl DocumentLifecycle {
    pub fn new(backends: Backends, deleted_prefix: impl Into<String>) -> Self {
        Self {
            backends,
            deleted_prefix: deleted_prefix.into(),
        }
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Blob key a document's file lives under while it is deleted.
    pub fn deleted_key(&self, key: &str) -> String {
        format!("{}/{}", self.deleted_prefix.trim_end_matches('/'), key)
    }

    pub async fn load(&self, id: &str) -> Result<Document> {
        self.backends
            .documents
            .get(id)
            .await
            .step(Step::Store)?
            .ok_or_else(|| DocsimError::NotFound(format!("document {}", id)))
    }

    /// Move `id` to `next` if the table allows it and nobody else moved it
    /// first. Returns the document as it is after the write.
    pub async fn transition(&self, id: &str, next: DocumentStatus) -> Result<Document> {
        let doc = self.load(id).await?;
        self.transition_from(doc, next).await
    }

    async fn transition_from(&self, doc: Document, next: DocumentStatus) -> Result<Document> {
        if !doc.status.can_transition_to(next) {
            return Err(DocsimError::InvalidTransition {
                from: doc.status,
                to: next,
            });
        }
        self.swap_status(doc, next).await
    }

    /// Compare-and-set without consulting the transition table.
    async fn swap_status(&self, doc: Document, next: DocumentStatus) -> Result<Document> {
        let from = doc.status;
        let swapped = self
            .backends
            .documents
            .compare_and_set_status(&doc.id, from, next)
            .await
            .step(Step::Store)?;
        if !swapped {
            return Err(DocsimError::Conflict(format!(
                "document {} is no longer {}",
                doc.id, from
            )));
        }

        info!(document_id = %doc.id, %from, to = %next, "status changed");
        Ok(Document {
            status: next,
            ..doc
        })
    }

    /// Claim a document for indexing. Only one worker can hold it.
    pub async fn begin_processing(&self, id: &str) -> Result<Document> {
        self.transition(id, DocumentStatus::Processing).await
    }

    pub async fn mark_processed(&self, id: &str) -> Result<Document> {
        self.transition(id, DocumentStatus::Processed).await
    }

    pub async fn mark_error(&self, id: &str) -> Result<Document> {
        self.transition(id, DocumentStatus::Error).await
    }

    /// Move the document's file under the deleted prefix, mark it deleted
    /// and deactivate its chunks.
    ///
    /// The file moves first. If a later step fails the earlier ones are
    /// undone, so a failed delete leaves the document as it was.
    pub async fn soft_delete(&self, id: &str) -> Result<Document> {
        let doc = self.load(id).await?;
        let previous = doc.status;
        if !previous.can_transition_to(DocumentStatus::Deleted) {
            return Err(DocsimError::InvalidTransition {
                from: previous,
                to: DocumentStatus::Deleted,
            });
        }

        let blobs = &self.backends.blobs;
        let moved = match doc.storage_key.as_deref() {
            Some(key) if blobs.exists(key).await.step(Step::Store)? => {
                let deleted = self.deleted_key(key);
                blobs.move_file(key, &deleted).await.step(Step::Store)?;
                Some(FileMove {
                    from: key.to_string(),
                    to: deleted,
                })
            }
            Some(key) => {
                warn!(document_id = %id, key, "file missing at delete time");
                None
            }
            None => None,
        };

        let doc = match self.swap_status(doc, DocumentStatus::Deleted).await {
            Ok(doc) => doc,
            Err(e) => {
                self.undo_move(id, moved.as_ref()).await;
                return Err(e);
            }
        };

        let deactivated = match self
            .backends
            .chunks
            .soft_delete_by_document_id(id)
            .await
            .step(Step::Store)
        {
            Ok(n) => n,
            Err(e) => {
                self.undo_status(&doc, previous).await;
                self.undo_move(id, moved.as_ref()).await;
                return Err(e);
            }
        };

        info!(document_id = %id, chunks = deactivated, "document soft-deleted");
        Ok(doc)
    }

    /// Bring a deleted document back: file, status, then chunks.
    ///
    /// Fails with [`DocsimError::NotFound`] if the document is not deleted
    /// and with [`DocsimError::Consistency`] if its file is not where a
    /// deleted file should be. A failure after the file move leaves the
    /// document deleted with its file under the deleted prefix.
    pub async fn restore(&self, id: &str) -> Result<Document> {
        let doc = self.load(id).await?;
        if doc.status != DocumentStatus::Deleted {
            return Err(DocsimError::NotFound(format!(
                "no deleted document {} (status is {})",
                id, doc.status
            )));
        }

        let blobs = &self.backends.blobs;
        let moved = match doc.storage_key.as_deref() {
            Some(key) => {
                let deleted = self.deleted_key(key);
                if !blobs.exists(&deleted).await.step(Step::Restore)? {
                    return Err(DocsimError::Consistency(format!(
                        "document {} is deleted but {} does not exist",
                        id, deleted
                    )));
                }
                blobs.move_file(&deleted, key).await.step(Step::Restore)?;
                Some(FileMove {
                    from: deleted,
                    to: key.to_string(),
                })
            }
            None => None,
        };

        // Leaving Deleted is not an ordinary transition; restore owns it.
        let doc = match self.swap_status(doc, DocumentStatus::Uploaded).await {
            Ok(doc) => doc,
            Err(e) => {
                self.undo_move(id, moved.as_ref()).await;
                return Err(e);
            }
        };

        let reactivated = match self
            .backends
            .chunks
            .restore_by_document_id(id)
            .await
            .step(Step::Restore)
        {
            Ok(n) => n,
            Err(e) => {
                self.undo_status(&doc, DocumentStatus::Deleted).await;
                self.undo_move(id, moved.as_ref()).await;
                return Err(e);
            }
        };

        info!(document_id = %id, chunks = reactivated, "document restored");
        Ok(doc)
    }

    async fn undo_move(&self, id: &str, moved: Option<&FileMove>) {
        let Some(m) = moved else { return };
        if let Err(e) = self.backends.blobs.move_file(&m.to, &m.from).await {
            warn!(document_id = %id, from = %m.to, to = %m.from, err = %e, "could not undo file move");
        }
    }

    async fn undo_status(&self, doc: &Document, back_to: DocumentStatus) {
        if let Err(e) = self.swap_status(doc.clone(), back_to).await {
            warn!(document_id = %doc.id, to = %back_to, err = %e, "could not undo status change");
        }
    }
}

/// A blob move that may need to be reversed.
struct FileMove {
    from: String,
    to: String,
}
