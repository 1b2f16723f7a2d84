//! # docsim
//!
//! Duplicate and near-duplicate detection for submitted documents.
//!
//! The dedup, chunking, batching, similarity and lifecycle logic lives in
//! [`docsim_core`]. This crate supplies the concrete backends (SQLite,
//! local filesystem, HTTP embedding providers, text extraction) and the
//! `docsim` CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────────┐   ┌──────────────┐
//! │  CLI       │──▶│  docsim-core         │──▶│  SQLite      │
//! │ (docsim)   │   │ evaluate / index /   │   │ docs, chunks │
//! └────────────┘   │ delete / restore     │   │ vectors      │
//!                  └──────────┬───────────┘   └──────────────┘
//!                             │
//!              ┌──────────────┼──────────────┐
//!              ▼              ▼              ▼
//!        ┌──────────┐  ┌────────────┐  ┌───────────┐
//!        │ extract  │  │ embedding  │  │ blob (fs) │
//!        └──────────┘  └────────────┘  └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docsim init                         # create database
//! docsim check essay.pdf              # evaluate without storing
//! docsim submit ./submissions         # store everything that is new
//! docsim similar <id>                 # near-duplicates of a stored document
//! docsim delete <id> && docsim restore <id>
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Repositories and vector index over SQLite |
//! | [`blob`] | Filesystem blob storage |
//! | [`extract`] | Text extraction (text, Markdown, PDF, DOCX, PPTX) |
//! | [`embedding`] | Embedding providers |
//! | [`services`] | Backend wiring |
//! | [`ingest`] | `check` and `submit` |
//! | [`manage`] | `similar`, `delete`, `restore`, `reindex` |
//! | [`embed_cmd`] | `embed pending` |
//! | [`get`] | `get` |
//! | [`stats`] | `stats` |

pub mod blob;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod get;
pub mod ingest;
pub mod manage;
pub mod migrate;
pub mod services;
pub mod sqlite_store;
pub mod stats;
