//! grcctl - operate the GRC server
//!
//! - `serve`: run the HTTP API
//! - `migrate`: apply schema migrations
//! - `seed`: insert the standard risk matrices
//! - `user create`: add an account (the first administrator, typically)
//! - `backup`: create, list, restore and clean up database backups

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "grcctl",
    author,
    version,
    about = "Run and administer the GRC server",
    long_about = "Serve the GRC HTTP API, apply migrations, seed risk matrices, \
                  create users and manage database backups."
)]
struct Cli {
    /// Debug logging (RUST_LOG still takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: $GRC_CONFIG or ~/.grc/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Database URL (overrides config and environment)
    #[arg(long, global = true, value_name = "URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API server
    Serve(commands::serve::ServeArgs),
    /// Apply database migrations
    Migrate,
    /// Insert the standard risk matrices (idempotent)
    Seed,
    /// Manage user accounts
    User(commands::user::UserArgs),
    /// Create, list, restore and clean up backups
    Backup(commands::backup::BackupArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    tracing_setup::init(&tracing_setup::TracingConfig { debug: cli.debug }).ok();

    let ctx = commands::Context::load(cli.config.as_deref(), cli.database_url)?;
    match cli.command {
        Commands::Serve(args) => commands::run_serve(&ctx, args).await?,
        Commands::Migrate => commands::run_migrate(&ctx).await?,
        Commands::Seed => commands::run_seed(&ctx).await?,
        Commands::User(args) => commands::run_user(&ctx, args).await?,
        Commands::Backup(args) => commands::run_backup(&ctx, args).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_nested_backup_command() {
        let cli = Cli::try_parse_from(["grcctl", "--debug", "backup", "cleanup", "--keep-days", "7"]).unwrap();
        assert!(cli.debug);
        match cli.command {
            Commands::Backup(args) => match args.command {
                commands::backup::BackupCommand::Cleanup { keep_days } => assert_eq!(keep_days, Some(7)),
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn user_create_parses_role() {
        let cli = Cli::try_parse_from([
            "grcctl", "user", "create", "--email", "admin@example.com", "--first-name", "Ada",
            "--last-name", "Admin", "--role", "admin", "--password", "correct horse",
        ])
        .unwrap();
        match cli.command {
            Commands::User(args) => match args.command {
                commands::user::UserCommand::Create(create) => {
                    assert_eq!(create.role, grc_core::UserRole::Admin)
                }
            },
            other => panic!("unexpected {:?}", other),
        }
    }
}
