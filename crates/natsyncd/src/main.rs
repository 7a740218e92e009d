//! natsyncd entry point.

use std::sync::Arc;

use clap::Parser;
use natsyncd::NatSyncd;
use statesync_common::{RedisDb, RedisStore, StoreHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Static NAT synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "natsyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis server host
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis server port
    #[arg(long, default_value = "6379")]
    redis_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .init();

    info!("starting natsyncd");

    let appl: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::ApplDb).await?,
    );
    let config: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::ConfigDb).await?,
    );
    let state: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::StateDb).await?,
    );

    let mut daemon = NatSyncd::new(appl, config, state).await?;
    let warm = daemon.start().await?;
    info!(warm, "natsyncd started");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            trigger.cancel();
        }
    });

    if let Err(e) = daemon.run(shutdown).await {
        error!(error = %e, "natsyncd exiting with error");
        return Err(e.into());
    }
    info!("natsyncd exiting");
    Ok(())
}
