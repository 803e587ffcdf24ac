//! Axum server setup
//!
//! Server skeleton with:
//! - Localhost-only CORS by default
//! - Tracing middleware
//! - Request body limit sized for backup uploads
//! - Graceful shutdown on SIGTERM/Ctrl+C

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::Router;
use grc_core::GrcConfig;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::routes;
use crate::backup::BackupService;

/// Largest accepted request body (backup restores are uploaded whole).
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to (default: 127.0.0.1:3030)
    pub bind_addr: SocketAddr,

    /// Allow permissive CORS (default: false = localhost only)
    ///
    /// WARNING: Setting this to true allows any origin.
    pub cors_permissive: bool,

    pub session_ttl_hours: u32,
    pub backup_dir: PathBuf,
    pub keep_days: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_parts(SocketAddr::from(([127, 0, 0, 1], 3030)), &GrcConfig::default())
    }
}

impl ServerConfig {
    /// Server settings from the loaded config file; fails on an unparsable bind address.
    pub fn from_config(config: &GrcConfig) -> Result<Self, ServerError> {
        let bind_addr = config
            .server
            .bind
            .parse()
            .map_err(|_| ServerError::InvalidBind(config.server.bind.clone()))?;
        Ok(Self::from_parts(bind_addr, config))
    }

    fn from_parts(bind_addr: SocketAddr, config: &GrcConfig) -> Self {
        Self {
            bind_addr,
            cors_permissive: config.server.cors_permissive,
            session_ttl_hours: config.session.ttl_hours,
            backup_dir: config.storage.backup_dir.clone(),
            keep_days: config.storage.keep_days,
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub session_ttl: chrono::Duration,
    pub backups: BackupService,
}

impl AppState {
    pub fn new(pool: PgPool, config: &ServerConfig) -> Self {
        let backups = BackupService::new(pool.clone(), config.backup_dir.clone(), config.keep_days);
        Self {
            pool,
            session_ttl: chrono::Duration::hours(i64::from(config.session_ttl_hours)),
            backups,
        }
    }
}

fn cors_layer(permissive: bool) -> CorsLayer {
    if permissive {
        tracing::warn!("CORS: Permissive mode enabled - all origins allowed");
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin([
            HeaderValue::from_static("http://localhost:3000"),
            HeaderValue::from_static("http://localhost:3030"),
            HeaderValue::from_static("http://127.0.0.1:3000"),
            HeaderValue::from_static("http://127.0.0.1:3030"),
        ])
        .allow_methods(Any)
        .allow_headers(Any)
}

/// All routes with middleware, ready to serve.
pub fn build_router(state: AppState, cors_permissive: bool) -> Router {
    Router::new()
        .merge(routes::health::router())
        .merge(routes::auth::router())
        .merge(routes::users::router())
        .merge(routes::findings::router())
        .merge(routes::risks::router())
        .merge(routes::risk_assessments::router())
        .merge(routes::risk_matrices::router())
        .merge(routes::compliance::router())
        .merge(routes::maturity::router())
        .merge(routes::sla::router())
        .merge(routes::backlog::router())
        .merge(routes::requests::router())
        .merge(routes::dashboard::router())
        .merge(routes::threat_modeling::router())
        .merge(routes::reference_data::router())
        .merge(routes::backups::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors_layer(cors_permissive))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Run the HTTP server.
///
/// # Example
///
/// ```ignore
/// let pool = create_pool(&database_url).await?;
/// run_server(pool, ServerConfig::default()).await?;
/// ```
pub async fn run_server(pool: PgPool, config: ServerConfig) -> Result<(), ServerError> {
    let state = AppState::new(pool, &config);
    tracing::info!(backup_dir = %config.backup_dir.display(), "backup directory");
    let app = build_router(state, config.cors_permissive);

    let listener = TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting shutdown");
        }
    }
}

/// Server error type
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bind address: {0}")]
    InvalidBind(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr.port(), 3030);
        assert!(!config.cors_permissive);
        assert_eq!(config.session_ttl_hours, 12);
    }

    #[test]
    fn bind_address_is_validated() {
        let mut grc = GrcConfig::default();
        grc.server.bind = "0.0.0.0:8080".into();
        assert_eq!(ServerConfig::from_config(&grc).unwrap().bind_addr.port(), 8080);

        grc.server.bind = "localhost".into();
        assert!(matches!(
            ServerConfig::from_config(&grc),
            Err(ServerError::InvalidBind(_))
        ));
    }
}
