//! Domain Adapters
//!
//! Implementations of domain ports backed by PostgreSQL. Each adapter
//! translates between domain models and repository rows and maps
//! [`crate::DatabaseError`] into `PortError`.

pub mod ledger;

pub use ledger::PostgresLedgerStore;
