//! Repository layers: Basic (single-type CRUD), Extended (joined result
//! shapes), Cross (many-to-many cross-reference tables).

mod basic;
mod cross;
mod extended;

pub use basic::{BasicRepo, Page};
pub use cross::CrossRepo;
pub use extended::ExtendedRepo;
