//! Idempotent schema migration, tracked by an append-only ledger.

mod ledger;
mod service;

pub use ledger::MigrationLedgerEntry;
pub use service::{MigrationRunSummary, MigrationService};
