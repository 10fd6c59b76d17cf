//! # lodestone
//!
//! **Code intelligence for Elixir projects** - scan once, navigate
//! everything. lodestone extracts declarations and references from a
//! project tree across several phases, persists them as a queryable graph
//! under `.lodestone/`, and answers navigation queries: definitions,
//! references, transitive callers/callees, routes, schemas, and
//! change-impact analysis.
//!
//! ## Pipeline
//!
//! ```text
//! discovery -> syntactic -> tracer -> xref -> routes -> schema
//!           -> typespec -> diagnostics -> merge -> store
//! ```
//!
//! Each phase tags its records with a source and confidence; the merge
//! layer deduplicates calls across phases by call-site key. Incremental
//! refresh diffs per-file fingerprints and re-extracts only changed and
//! affected files.
//!
//! ## Quick Start (Library Usage)
//!
//! ```rust,no_run
//! use std::path::Path;
//! use lodestone::indexer::{ensure_index_current, IndexOptions};
//! use lodestone::{graph, store::Store};
//!
//! let root = Path::new(".");
//! ensure_index_current(root, &IndexOptions::default()).unwrap();
//! let store = Store::new(root);
//! for entry in graph::callers(&store, "App.Accounts.get_user/1", 2).unwrap() {
//!     println!("{} (depth {})", entry.mfa, entry.depth);
//! }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! lode index                                 # Build or refresh the index
//! lode query definition --mfa App.Run.go/1   # Where is it defined?
//! lode query callers --mfa App.Run.go/1 --depth 3
//! lode query impact --files lib/accounts.ex  # What breaks?
//! ```

/// Change detection: per-file fingerprint diff and the transitive
/// dependent closure used for incremental refresh.
pub mod changes;

/// Source-file enumeration with stable ordering.
pub mod discovery;

/// Error taxonomy for the store and query layers.
pub mod error;

/// Extraction phases (syntactic, tracer, xref, routes, schema, typespec,
/// diagnostics) and the cross-phase merge layer.
pub mod extractor;

/// The query engine: definition, references, BFS callers/callees, routes,
/// schema, and change impact.
pub mod graph;

/// Orchestration: full index runs and pull-driven incremental refresh.
pub mod indexer;

/// MFA string grammar (`Module.name/arity`).
pub mod mfa;

/// Hand-written Elixir lexer and tolerant recursive-descent parser.
pub mod parser;

/// Record model: typed records with source/confidence provenance and the
/// JSONL envelope.
pub mod records;

/// Persistent store: `manifest.json` + `index.jsonl` with atomic rewrites
/// and streaming reads.
pub mod store;

pub use error::{Error, Result};
pub use graph::{GraphEntry, ImpactReport};
pub use indexer::{ensure_index_current, run_index, IndexOptions, IndexOutcome, RefreshOutcome};
pub use records::{Record, RecordData, RecordKind};
pub use store::{Manifest, Store};
