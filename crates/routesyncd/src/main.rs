//! routesyncd entry point.
//!
//! The decoded route feed arrives as JSON lines on stdin; the upstream
//! decoder owns the routing-protocol wire format.

use std::sync::Arc;

use clap::Parser;
use routesyncd::{FeedRecord, RouteSyncd};
use statesync_common::{RedisDb, RedisStore, StoreHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Route synchronization daemon
#[derive(Parser, Debug)]
#[command(name = "routesyncd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Redis server host
    #[arg(long, default_value = "127.0.0.1")]
    redis_host: String,

    /// Redis server port
    #[arg(long, default_value = "6379")]
    redis_port: u16,
}

fn spawn_stdin_feed() -> mpsc::UnboundedReceiver<FeedRecord> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match FeedRecord::parse(&line) {
                        Ok(record) => {
                            if tx.send(record).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed feed line"),
                    }
                }
                Ok(None) => {
                    info!("route feed closed");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "route feed read failed");
                    break;
                }
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .compact()
        .init();

    info!("starting routesyncd");

    let appl: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::ApplDb).await?,
    );
    let config: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::ConfigDb).await?,
    );
    let state: StoreHandle = Arc::new(
        RedisStore::connect(&args.redis_host, args.redis_port, RedisDb::StateDb).await?,
    );

    let feed = spawn_stdin_feed();
    let mut daemon = RouteSyncd::new(appl, config, state, feed).await?;
    let warm = daemon.start().await?;
    info!(warm, "routesyncd started");

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            trigger.cancel();
        }
    });

    if let Err(e) = daemon.run(shutdown).await {
        error!(error = %e, "routesyncd exiting with error");
        return Err(e.into());
    }
    info!("routesyncd exiting");
    Ok(())
}
