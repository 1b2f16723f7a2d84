//! # docsim core
//!
//! Shared logic for docsim: data models, content fingerprints, chunking,
//! embedding batching, the storage and collaborator traits, similarity
//! evaluation and the document lifecycle state machine.
//!
//! This crate contains no SQL, HTTP or filesystem code. Concrete stores,
//! blob storage, text extraction and embedding providers live in the
//! `docsim` application crate and are handed to the core as trait objects.
//!
//! ## Pipeline
//!
//! ```text
//! bytes ──▶ hash ──▶ exact lookup (active / deleted) ──▶ restore?
//!             │
//!             ▼
//!          extract ──▶ text hash ──▶ exact lookup ──▶ restore?
//!             │
//!             ▼
//!          chunk ──▶ batch embed ──▶ k-NN per chunk ──▶ aggregate ──▶ decision
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`hash`] | Binary and normalized-text fingerprints |
//! | [`chunk`] | Paragraph / sentence / word chunker with overlap |
//! | [`embedding`] | Provider trait, provider errors, vector helpers |
//! | [`batch`] | Sub-batching embedding requests under count and token budgets |
//! | [`store`] | Repository, vector index, blob and extractor traits |
//! | [`similarity`] | Submission classification and candidate scoring |
//! | [`lifecycle`] | Status transitions, soft delete and restore |
//! | [`indexing`] | Persisting chunks and embeddings for a document |

pub mod batch;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod hash;
pub mod indexing;
pub mod lifecycle;
pub mod models;
pub mod similarity;
pub mod store;

pub use error::{DocsimError, Result, Step};
