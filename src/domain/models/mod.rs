mod context;
mod epoch;
mod facts;
mod file;
mod file_state;
mod language;
mod search;
mod stats;

pub use context::*;
pub use epoch::*;
pub use facts::*;
pub use file::*;
pub use file_state::*;
pub use language::*;
pub use search::*;
pub use stats::*;
