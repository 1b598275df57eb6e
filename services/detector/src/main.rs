//! camoscan
//!
//! Diagnostic TCP-in-the-middle detector for TLS camouflage proxies
//! (ShadowTLS, REALITY). Point `--remote` at the suspected server and a
//! real TLS client at `--listen`; camoscan relays the connection while
//! comparing the server's session-ticket record sizes against a reference
//! probe, and prints a verdict when they diverge.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use camoscan_detector::config::{Config, VictimProtocol};
use camoscan_detector::scan;

#[derive(Debug, Parser)]
#[command(name = "camoscan")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TCP endpoint to accept victim connections on.
    #[arg(long, default_value = "0.0.0.0:10444")]
    listen: SocketAddr,

    /// TCP endpoint of the suspected camouflage server.
    #[arg(long, default_value = "127.0.0.1:10443")]
    remote: String,

    /// Victim protocol family; selects the server Finished size table.
    #[arg(long, value_enum, default_value_t = VictimProtocol::Reality)]
    victim: VictimProtocol,

    /// Override the server Finished size table (comma-separated record
    /// lengths, e.g. "57,73").
    #[arg(long)]
    finished_sizes: Option<String>,

    /// Maximum concurrent victim connections.
    #[arg(long, default_value_t = 256)]
    max_connections: usize,

    /// Default log filter when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| cli.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::new(
        cli.listen,
        cli.remote,
        cli.victim,
        cli.finished_sizes.as_deref(),
        cli.max_connections,
    )?);

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    info!(
        listen_addr = %config.listen_addr,
        remote_addr = %config.remote_addr,
        victim = ?config.victim,
        server_finished_sizes = ?config.server_finished_sizes,
        "camoscan listening"
    );

    let conn_semaphore = Arc::new(Semaphore::new(config.max_connections));

    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let permit = match conn_semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!(peer_addr = %peer_addr, "connection rejected: max connections reached");
                        continue;
                    }
                };

                let config = Arc::clone(&config);
                tokio::spawn(
                    async move {
                        if let Err(e) = scan::handle_connection(stream, &config).await {
                            debug!(error = %e, "scan session ended with error");
                        }
                        drop(permit);
                    }
                    .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                );
            }
            Err(e) => {
                error!(error = %e, "accept error");
                // Brief sleep to avoid a tight loop on persistent errors.
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}
