//! # Connector Layer
//!
//! External integrations behind the domain interfaces:
//! - SQLite storage for files, contexts and fact tables
//! - tantivy for the lexical full-text layer
//! - tree-sitter parsing and structural fact extraction
//! - filesystem watching and ignore handling

pub mod ignore;
pub mod lexical;
pub mod parser;
pub mod storage;
pub mod watcher;

pub use ignore::*;
pub use lexical::*;
pub use parser::*;
pub use storage::*;
pub use watcher::*;
