//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! rental ledger test suite.
//!
//! # Modules
//!
//! - `fixtures`: Pre-built bookings, amounts, and guest details
//! - `builders`: Builder for bookings with a seeded ledger
//! - `gateways`: Scripted device gateway for routing tests
//! - `database`: PostgreSQL test container management
//! - `assertions`: Ledger assertion helpers
//! - `generators`: Property-based test data generators

pub mod fixtures;
pub mod builders;
pub mod gateways;
pub mod database;
pub mod assertions;
pub mod generators;

pub use fixtures::*;
pub use builders::*;
pub use gateways::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
