//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the booking ledger using SQLx.
//!
//! # Architecture
//!
//! - [`repositories`]: SQL and row types, one repository per aggregate group
//! - [`adapters`]: domain port implementations built on the repositories
//!
//! Schema migrations live in the workspace `migrations/` directory and are
//! embedded with `sqlx::migrate!`.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, DatabaseConfig, PostgresLedgerStore};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/rental_ledger")).await?;
//! let store = Arc::new(PostgresLedgerStore::new(pool));
//! ```

pub mod pool;
pub mod error;
pub mod repositories;
pub mod adapters;

pub use pool::{DatabasePool, DatabaseConfig, create_pool, create_pool_from_url, run_migrations};
pub use error::DatabaseError;
pub use adapters::PostgresLedgerStore;
