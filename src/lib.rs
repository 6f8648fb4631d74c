//! # CodePlane
//!
//! A long-lived, repository-local control plane that maintains a hybrid
//! code index and serves it to coding agents. The index fuses a lexical
//! full-text layer (tantivy), a structural layer (tree-sitter derived
//! definitions, references, imports, scopes and type facts) and a
//! semantic resolution layer (import-chain and type-traced resolvers).
//! A background reconciler keeps the index consistent with the working
//! tree; monotonically increasing epochs give readers self-consistent
//! snapshots.
//!
//! ## Architecture
//!
//! - `domain`: entities, the language registry, and the error taxonomy
//! - `application`: discovery, extraction, resolution, epoching, the
//!   background indexer and the query surface
//! - `connector`: SQLite storage, the tantivy index, tree-sitter
//!   parsing, ignore handling and the file watcher
//! - `config`: per-repo `.codeplane/config.yaml` overrides

pub mod application;
pub mod config;
pub mod connector;
pub mod daemon;
pub mod domain;

pub use application::*;
pub use config::Config;
pub use connector::*;
pub use domain::*;
