//! HTTP server command

use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use clap::Parser;
use grc_server::{run_migrations, run_server, ServerConfig};

use super::Context;

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to (default: [server] bind, 127.0.0.1:3030)
    #[arg(long, short = 'b')]
    pub bind: Option<SocketAddr>,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long)]
    pub cors_permissive: bool,

    /// Apply pending migrations before serving
    #[arg(long)]
    pub migrate: bool,
}

pub async fn run_serve(ctx: &Context, args: ServeArgs) -> Result<()> {
    let mut config = ServerConfig::from_config(&ctx.config).context("Invalid server configuration")?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    config.cors_permissive |= args.cors_permissive;

    let pool = ctx.pool().await?;
    if args.migrate {
        run_migrations(&pool).await.context("Migration failed")?;
    }

    tracing::info!(bind = %config.bind_addr, cors_permissive = config.cors_permissive, "starting GRC server");
    run_server(pool, config).await.context("Server error")?;
    Ok(())
}
