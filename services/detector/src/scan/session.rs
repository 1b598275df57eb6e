//! Per-connection scan session.
//!
//! For each accepted victim connection: capture the raw ClientHello, run
//! the reference probe, replay the ClientHello verbatim to the suspect, and
//! relay both directions through the record watchers until either side
//! closes.

use std::io;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use camoscan_wire::{u16_from_be_slice, WireError, RECORD_HEADER_LEN};

use crate::config::Config;

use super::framer::{RecordFramer, RecordInspector};
use super::probe::{probe_tickets, ProbeError};
use super::watcher::{DownstreamWatcher, UpstreamWatcher};

/// Errors that end a scan session. Logged by the listener, never surfaced
/// to the victim as TLS bytes.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("victim ClientHello rejected: {0}")]
    ClientHello(#[from] WireError),

    #[error("reference probe failed: {0}")]
    Probe(#[from] ProbeError),
}

/// What one relayed session observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOutcome {
    /// Whether the camouflage verdict fired.
    pub detected: bool,
    /// Bytes relayed victim -> suspect.
    pub bytes_to_upstream: u64,
    /// Bytes relayed suspect -> victim.
    pub bytes_to_victim: u64,
}

/// Handle one accepted victim connection end to end.
pub async fn handle_connection(mut victim: TcpStream, config: &Config) -> Result<(), ScanError> {
    let raw_client_hello = read_client_hello(&mut victim).await?;
    let summary = camoscan_wire::parse_client_hello(&raw_client_hello)?;
    debug!(
        sni = ?summary.sni,
        alpn_offers = summary.alpn.len(),
        "victim ClientHello captured"
    );

    let tickets_lens = probe_tickets(&config.remote_addr, &summary).await?;

    let outcome = scan_with_reference(
        victim,
        &config.remote_addr,
        &raw_client_hello,
        tickets_lens,
        config.server_finished_sizes.clone(),
    )
    .await?;

    if let Some(outcome) = outcome {
        debug!(
            detected = outcome.detected,
            bytes_to_upstream = outcome.bytes_to_upstream,
            bytes_to_victim = outcome.bytes_to_victim,
            "scan session finished"
        );
    }
    Ok(())
}

/// Start the relay phase for a captured ClientHello and probe reference.
///
/// With an empty reference there is nothing to compare against, so the
/// session is declined instead of relayed blind.
pub async fn scan_with_reference<V>(
    victim: V,
    remote: &str,
    raw_client_hello: &[u8],
    tickets_lens: Vec<u16>,
    server_finished_sizes: Vec<u16>,
) -> Result<Option<ScanOutcome>, ScanError>
where
    V: AsyncRead + AsyncWrite + Unpin,
{
    if tickets_lens.is_empty() {
        println!("No session tickets found, unable to determine victim protocol");
        return Ok(None);
    }

    println!("Starting scan...");
    let upstream = TcpStream::connect(remote).await?;
    let outcome = relay(
        victim,
        upstream,
        raw_client_hello,
        tickets_lens,
        server_finished_sizes,
    )
    .await?;
    Ok(Some(outcome))
}

/// Relay victim and suspect until either direction closes, watching record
/// boundaries on both.
///
/// The raw ClientHello bytes are replayed to the suspect verbatim, as the
/// first bytes on the wire: camouflage servers may whitelist byte-exact
/// ClientHello shapes, and re-serialization would break exactly the servers
/// this tool targets.
pub async fn relay<V, U>(
    victim: V,
    mut upstream: U,
    raw_client_hello: &[u8],
    tickets_lens: Vec<u16>,
    server_finished_sizes: Vec<u16>,
) -> io::Result<ScanOutcome>
where
    V: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    upstream.write_all(raw_client_hello).await?;

    let client_finished_seen = Arc::new(AtomicBool::new(false));
    let (victim_read, victim_write) = tokio::io::split(victim);
    let (upstream_read, upstream_write) = tokio::io::split(upstream);

    let mut downstream = RecordFramer::new(
        victim_read,
        DownstreamWatcher::new(Arc::clone(&client_finished_seen)),
    );
    let mut upstream_watch = RecordFramer::new(
        upstream_read,
        UpstreamWatcher::new(tickets_lens, server_finished_sizes, client_finished_seen),
    );

    let (to_upstream, to_victim) = tokio::join!(
        copy_framed(&mut downstream, upstream_write),
        copy_framed(&mut upstream_watch, victim_write),
    );

    // The relay is best-effort past the verdict; either side going away is
    // a normal end of session.
    let bytes_to_upstream = to_upstream.unwrap_or_else(|e| {
        debug!(error = %e, "victim -> suspect relay ended with error");
        0
    });
    let bytes_to_victim = to_victim.unwrap_or_else(|e| {
        debug!(error = %e, "suspect -> victim relay ended with error");
        0
    });

    Ok(ScanOutcome {
        detected: upstream_watch.inspector().detected(),
        bytes_to_upstream,
        bytes_to_victim,
    })
}

/// Pump one direction through its framer until EOF, then shut down the
/// peer's write half so the close propagates.
async fn copy_framed<R, I, W>(framer: &mut RecordFramer<R, I>, mut writer: W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    I: RecordInspector,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let mut total = 0u64;
    loop {
        let n = framer.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.shutdown().await?;
    Ok(total)
}

/// Read the victim's first TLS record whole, header included.
async fn read_client_hello<R: AsyncRead + Unpin>(stream: &mut R) -> io::Result<Vec<u8>> {
    let mut record = vec![0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut record).await?;
    let len = u16_from_be_slice(&record[3..5]) as usize;
    record.resize(RECORD_HEADER_LEN + len, 0);
    stream.read_exact(&mut record[RECORD_HEADER_LEN..]).await?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_hello_read_whole() {
        let mut record = vec![0x16, 0x03, 0x01, 0x00, 0x04];
        record.extend_from_slice(&[1, 2, 3, 4]);

        let mut victim = tokio_test::io::Builder::new().read(&record).build();
        let got = read_client_hello(&mut victim).await.unwrap();
        assert_eq!(got, record);
    }

    #[tokio::test]
    async fn client_hello_read_across_fragments() {
        let mut record = vec![0x16, 0x03, 0x01, 0x00, 0x06];
        record.extend_from_slice(&[9, 8, 7, 6, 5, 4]);

        let mut victim = tokio_test::io::Builder::new()
            .read(&record[..3])
            .read(&record[3..8])
            .read(&record[8..])
            .build();
        let got = read_client_hello(&mut victim).await.unwrap();
        assert_eq!(got, record);
    }
}
