//! Command implementations for grcctl

pub mod backup;
pub mod serve;
pub mod user;

use std::path::Path;

use anyhow::{Context as _, Result};
use grc_core::{matrix, GrcConfig};
use grc_server::db::MatrixRepo;
use grc_server::{create_pool_with_options, run_migrations};
use sqlx::PgPool;

pub use backup::run_backup;
pub use serve::run_serve;
pub use user::run_user;

/// Recorded as the actor for changes made from the command line.
pub const CLI_ACTOR: &str = "grcctl";

/// Loaded configuration shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: GrcConfig,
}

impl Context {
    /// Config file, then environment, then the `--database-url` flag.
    pub fn load(path: Option<&Path>, database_url: Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let mut config = GrcConfig::load_from(path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?;
                config.apply_env();
                config
            }
            None => GrcConfig::load().context("Failed to load config")?,
        };
        if let Some(url) = database_url {
            config.database.url = Some(url);
        }
        config.validate().context("Invalid configuration")?;
        Ok(Self { config })
    }

    pub fn database_url(&self) -> Result<&str> {
        self.config
            .database
            .url
            .as_deref()
            .context("DATABASE_URL not set. Set via --database-url, DATABASE_URL env, or [database] url in the config file")
    }

    pub async fn pool(&self) -> Result<PgPool> {
        let url = self.database_url()?;
        create_pool_with_options(url, self.config.database.max_connections)
            .await
            .context("Failed to create database pool")
    }
}

pub async fn run_migrate(ctx: &Context) -> Result<()> {
    let pool = ctx.pool().await?;
    run_migrations(&pool).await.context("Migration failed")?;
    println!("Migrations applied");
    Ok(())
}

pub async fn run_seed(ctx: &Context) -> Result<()> {
    let pool = ctx.pool().await?;
    let created = MatrixRepo::new(&pool)
        .seed(matrix::default_seeds(), CLI_ACTOR)
        .await
        .context("Failed to seed risk matrices")?;
    if created.is_empty() {
        println!("Risk matrices already present");
    } else {
        for name in &created {
            println!("Created risk matrix: {}", name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn flag_overrides_file_database_url() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[database]\nurl = \"postgres://file/db\"\nmax_connections = 3\n").unwrap();

        let ctx = Context::load(Some(&path), Some("postgres://flag/db".into())).unwrap();
        assert_eq!(ctx.database_url().unwrap(), "postgres://flag/db");
        assert_eq!(ctx.config.database.max_connections, 3);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[storage]\nkeep_days = 0\n").unwrap();
        assert!(Context::load(Some(&path), None).is_err());
    }
}
