//! # Domain Layer
//!
//! Core entities of the hybrid index (files, contexts, facts, epochs),
//! the language registry, and the error taxonomy. This layer is
//! independent of storage, parsing and runtime concerns.

pub mod error;
pub mod models;

pub use error::*;
pub use models::*;
