//! Query surface: search modes, repository mapping and scope-aware
//! reads over the committed snapshot.

mod map_repo;
mod scope_read;
mod search;

pub use map_repo::*;
pub use scope_read::*;
pub use search::*;
