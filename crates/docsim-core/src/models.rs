//! Core data models shared by the pipeline and the stores.
//!
//! [`Document`] and [`DocumentChunk`] mirror the persisted rows;
//! [`SimilarityCandidate`] is derived during evaluation and never stored.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocsimError;

/// Lifecycle status of a document.
///
/// The persisted status doubles as an advisory single-writer gate: a
/// document only enters [`Processing`](DocumentStatus::Processing) from a
/// status that allows it, and the move is a compare-and-set in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Error,
    Deleted,
}

impl DocumentStatus {
    pub const ALL: [DocumentStatus; 5] = [
        DocumentStatus::Uploaded,
        DocumentStatus::Processing,
        DocumentStatus::Processed,
        DocumentStatus::Error,
        DocumentStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
            DocumentStatus::Deleted => "deleted",
        }
    }

    /// Statuses reachable from `self` through an ordinary transition.
    ///
    /// `Deleted` has no ordinary exits; leaving it is only possible through
    /// [`DocumentLifecycle::restore`](crate::lifecycle::DocumentLifecycle::restore).
    pub fn allowed_transitions(&self) -> &'static [DocumentStatus] {
        use DocumentStatus::*;
        match self {
            Uploaded => &[Processing, Error, Deleted],
            Processing => &[Processed, Error, Deleted],
            Processed => &[Processing, Deleted],
            Error => &[Processing, Deleted],
            Deleted => &[],
        }
    }

    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, DocumentStatus::Deleted)
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = DocsimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uploaded" => Ok(DocumentStatus::Uploaded),
            "processing" => Ok(DocumentStatus::Processing),
            "processed" => Ok(DocumentStatus::Processed),
            "error" => Ok(DocumentStatus::Error),
            "deleted" => Ok(DocumentStatus::Deleted),
            other => Err(DocsimError::Validation(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// How a chunk was produced by the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    /// A whole paragraph that fit within the size limit.
    Paragraph,
    /// Consecutive sentences of an oversized paragraph.
    SentenceGroup,
    /// Consecutive words of an oversized sentence or paragraph.
    WordGroup,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Paragraph => "paragraph",
            ChunkType::SentenceGroup => "sentence_group",
            ChunkType::WordGroup => "word_group",
        }
    }
}

impl fmt::Display for ChunkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChunkType {
    type Err = DocsimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paragraph" => Ok(ChunkType::Paragraph),
            "sentence_group" => Ok(ChunkType::SentenceGroup),
            "word_group" => Ok(ChunkType::WordGroup),
            other => Err(DocsimError::Validation(format!(
                "unknown chunk type: {}",
                other
            ))),
        }
    }
}

/// A submitted document.
///
/// `binary_hash` is fixed at creation. A `Deleted` document keeps both
/// hashes so a later identical submission can find and restore it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    /// Blob key of the file while the document is active.
    pub storage_key: Option<String>,
    pub binary_hash: String,
    pub text_hash: Option<String>,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    /// Owning course/class, opaque to the core.
    pub collection_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Document {
    /// A fresh `Uploaded` document with a random id.
    pub fn new_uploaded(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        binary_hash: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            storage_key: None,
            binary_hash: binary_hash.into(),
            text_hash: None,
            status: DocumentStatus::Uploaded,
            extracted_text: None,
            collection_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted chunk of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: String,
    /// Includes any overlap copied from the previous chunk.
    pub content: String,
    pub chunk_index: i64,
    pub chunk_type: ChunkType,
    pub embedding: Option<Vec<f32>>,
    pub is_active: bool,
}

/// A document scored against a submission. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarityCandidate {
    pub document_id: String,
    /// Mean similarity of the hits against this document, clamped to `[0, 1]`.
    pub avg_similarity: f64,
    /// `matched_chunks / total_chunks`, clamped to `[0, 1]`.
    pub coverage: f64,
    pub matched_chunks: usize,
    pub total_chunks: usize,
    pub final_score: f64,
}

/// Clamp to `[0, 1]`, mapping NaN to 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// `final_score = avg_similarity × coverage`, each factor clamped first.
pub fn final_score(avg_similarity: f64, coverage: f64) -> f64 {
    clamp_unit(avg_similarity) * clamp_unit(coverage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use DocumentStatus::*;
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Uploaded.can_transition_to(Error));
        assert!(Uploaded.can_transition_to(Deleted));
        assert!(!Uploaded.can_transition_to(Processed));

        assert!(Processing.can_transition_to(Processed));
        assert!(!Processing.can_transition_to(Uploaded));

        assert!(Processed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(Error));

        assert!(Error.can_transition_to(Processing));
        assert!(!Error.can_transition_to(Processed));

        for next in DocumentStatus::ALL {
            assert!(!Deleted.can_transition_to(next), "Deleted -> {}", next);
        }
    }

    #[test]
    fn test_status_roundtrip_str() {
        for s in DocumentStatus::ALL {
            assert_eq!(s.as_str().parse::<DocumentStatus>().unwrap(), s);
        }
        assert!("archived".parse::<DocumentStatus>().is_err());
    }

    #[test]
    fn test_chunk_type_parse() {
        assert_eq!(
            "sentence_group".parse::<ChunkType>().unwrap(),
            ChunkType::SentenceGroup
        );
        assert!("sentence-group".parse::<ChunkType>().is_err());
    }

    #[test]
    fn test_final_score_examples() {
        assert!((final_score(0.8, 0.5) - 0.4).abs() < 1e-9);
        assert!((final_score(0.9, 0.85) - 0.765).abs() < 1e-9);
    }

    #[test]
    fn test_final_score_always_in_unit() {
        let values = [-3.0, -0.1, 0.0, 0.25, 0.5, 1.0, 1.5, 7.0, f64::NAN];
        for a in values {
            for c in values {
                let s = final_score(a, c);
                assert!((0.0..=1.0).contains(&s), "final_score({}, {}) = {}", a, c, s);
            }
        }
        assert!((final_score(0.6, 2.0) - 0.6).abs() < 1e-9);
    }
}
