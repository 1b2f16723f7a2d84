//! Error taxonomy for the core pipeline.
//!
//! Collaborators (stores, extractors, blob storage) report failures as
//! [`anyhow::Error`]; the core wraps them in [`DocsimError::Step`] tagged
//! with the pipeline step that was running, so callers can tell a failed
//! extraction from a failed vector query without string matching.

use std::fmt;

use crate::models::DocumentStatus;

/// Pipeline step that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Hash,
    Extract,
    Chunk,
    Embed,
    Search,
    Store,
    Restore,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Hash => "hash",
            Step::Extract => "extract",
            Step::Chunk => "chunk",
            Step::Embed => "embed",
            Step::Search => "search",
            Step::Store => "store",
            Step::Restore => "restore",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DocsimError {
    /// Bad configuration or input, rejected before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A single input of a batch is unusable.
    #[error("invalid input at index {index}: {reason}")]
    InvalidInput { index: usize, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("status transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: DocumentStatus,
        to: DocumentStatus,
    },

    /// Another writer changed the document status first.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Embedding or vector backend failure that was not absorbed by batching.
    #[error("provider error: {0}")]
    Provider(String),

    /// Persisted state disagrees with blob storage; fatal to the operation.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("{step} step failed: {source:#}")]
    Step {
        step: Step,
        #[source]
        source: anyhow::Error,
    },
}

impl DocsimError {
    pub fn at(step: Step, source: impl Into<anyhow::Error>) -> Self {
        DocsimError::Step {
            step,
            source: source.into(),
        }
    }

    /// The step an adapter failure originated from, if it was tagged.
    pub fn step(&self) -> Option<Step> {
        match self {
            DocsimError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocsimError>;

/// Tags an adapter result with the step it belongs to.
pub(crate) trait StepContext<T> {
    fn step(self, step: Step) -> Result<T>;
}

impl<T> StepContext<T> for anyhow::Result<T> {
    fn step(self, step: Step) -> Result<T> {
        self.map_err(|e| DocsimError::at(step, e))
    }
}
