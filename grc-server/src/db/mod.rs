//! Database layer - connection pool, migrations and repositories
//!
//! - Connection pool (max 5 connections by default)
//! - List operations return totals via `COUNT(*) OVER()`
//! - Unique constraints decide duplicates; violations map to `DbError::Duplicate`
//! - Updates check `row_version`; a stale token maps to `DbError::Conflict`
//! - Multi-step writes run inside a transaction

pub mod migrations;
pub mod pool;
pub mod repos;

pub use migrations::run_migrations;
pub use pool::{create_pool, create_pool_with_options};
pub use repos::*;
