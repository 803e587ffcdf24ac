//! grc-server: HTTP API for the GRC platform
//!
//! Layers:
//! - `db`: connection pool, schema migrations, repositories
//! - `http`: axum server, auth, error mapping, route handlers
//! - `backup`: JSON database export, restore and progress tracking
//! - `import`: CSV bulk import for findings, controls and reference data

pub mod backup;
pub mod db;
pub mod http;
pub mod import;
pub mod models;

pub use db::{create_pool, create_pool_with_options, run_migrations, DbError};
pub use http::{run_server, AppState, ServerConfig};
