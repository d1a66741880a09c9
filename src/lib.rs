//! # codesync
//!
//! Incremental synchronization of a source-code tree into a vector store.
//!
//! codesync keeps a semantic index of a codebase consistent as files are
//! added, edited and deleted, without re-embedding unchanged content. A
//! durable snapshot records what every file currently owns in the store,
//! so an interrupted run resumes where it stopped.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌────────────────┐   ┌──────────────┐
//! │  Scanner  │──▶│   Diff   │──▶│    Pipeline    │──▶│ Vector store │
//! │ walk+hash │   │ SyncPlan │   │ chunk+embed+up │   │ memory/SQLite│
//! └───────────┘   └────▲─────┘   └───────┬────────┘   └──────────────┘
//!                      │                 │ per-file commit
//!                 ┌────┴─────────────────▼────┐
//!                 │     Snapshot (SQLite)     │
//!                 └───────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! codesync sync ./my-repo          # index or catch up
//! codesync plan ./my-repo          # show what would change
//! codesync status ./my-repo
//! codesync search ./my-repo "retry with backoff"
//! codesync clear ./my-repo         # drop collection and snapshot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Fingerprints, snapshots, plans |
//! | [`error`] | Error taxonomy |
//! | [`identity`] | Codebase identity and collection naming |
//! | [`ignore`] | Ignore predicate and glob matcher |
//! | [`scanner`] | Fingerprint scanner |
//! | [`diff`] | Diff engine |
//! | [`chunk`] | Chunker capability and line-window chunker |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store contract and backends |
//! | [`snapshot`] | Durable snapshot store |
//! | [`retry`] | Retry policy |
//! | [`pipeline`] | Reconciliation pipeline |
//! | [`orchestrator`] | Sync runs, status, clear, plan, search |
//! | [`progress`] | Progress reporting |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod db;
pub mod diff;
pub mod embedding;
pub mod error;
pub mod identity;
pub mod ignore;
pub mod migrate;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod scanner;
pub mod snapshot;
pub mod store;
