//! Repository implementations
//!
//! Repositories hold the SQL and map rows to plain structs. Functions that
//! take a connection instead of `&self` are meant to run inside a caller's
//! transaction.

pub mod ledger;

pub use ledger::LedgerRepository;
