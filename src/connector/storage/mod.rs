mod database;
mod integrity;

pub use database::*;
pub use integrity::*;
