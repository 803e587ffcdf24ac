//! Backup commands, run directly against the database and backup directory

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use grc_server::backup::progress::registry;
use grc_server::backup::{BackupService, BackupType};

use super::{Context, CLI_ACTOR};

#[derive(Parser, Debug)]
pub struct BackupArgs {
    #[command(subcommand)]
    pub command: BackupCommand,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Export the database to a new backup file
    Create {
        /// Name embedded in the file name
        #[arg(long, default_value = "manual")]
        name: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long = "type", value_enum, default_value_t = Kind::Database)]
        kind: Kind,
    },
    /// List backup files, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Replace table contents from a backup file
    Restore {
        file_name: String,
    },
    /// Delete backups older than the retention period
    Cleanup {
        /// Override [storage] keep_days
        #[arg(long)]
        keep_days: Option<u32>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// All data except user accounts
    Database,
    /// All data including user accounts
    Full,
    /// Matrices, settings, frameworks and reference data
    Configuration,
}

impl From<Kind> for BackupType {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Database => Self::DatabaseOnly,
            Kind::Full => Self::FullBackup,
            Kind::Configuration => Self::ConfigurationOnly,
        }
    }
}

async fn service(ctx: &Context) -> Result<BackupService> {
    let pool = ctx.pool().await?;
    let storage = &ctx.config.storage;
    Ok(BackupService::new(pool, storage.backup_dir.clone(), storage.keep_days))
}

pub async fn run_backup(ctx: &Context, args: BackupArgs) -> Result<()> {
    let backups = service(ctx).await?;
    match args.command {
        BackupCommand::Create { name, description, kind } => {
            let result = backups
                .create(&name, description, kind.into(), CLI_ACTOR)
                .await
                .context("Backup failed")?;
            println!("{}", result.message);
            if let Some(file) = result.file_name {
                println!("{}", backups.dir().join(file).display());
            }
        }
        BackupCommand::List { json } => {
            let list = backups.list().await.context("Failed to list backups")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&list)?);
            } else if list.is_empty() {
                println!("No backups in {}", backups.dir().display());
            } else {
                for b in &list {
                    println!("{}  {:>12}  {}", b.created_at.format("%Y-%m-%d %H:%M:%S"), b.size_bytes, b.file_name);
                }
            }
        }
        BackupCommand::Restore { file_name } => {
            let progress_id = registry().start();
            let rows = backups
                .restore(&file_name, progress_id)
                .await
                .with_context(|| format!("Restore of {} failed", file_name))?;
            registry().remove(progress_id);
            println!("Restored {} rows from {}", rows, file_name);
        }
        BackupCommand::Cleanup { keep_days } => {
            let removed = backups.cleanup(keep_days).await.context("Cleanup failed")?;
            println!("Removed {} backup(s)", removed);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_backup_types() {
        assert_eq!(BackupType::from(Kind::Database), BackupType::DatabaseOnly);
        assert_eq!(BackupType::from(Kind::Full), BackupType::FullBackup);
        assert_eq!(BackupType::from(Kind::Configuration), BackupType::ConfigurationOnly);
    }
}
