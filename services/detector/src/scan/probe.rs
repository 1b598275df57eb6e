//! Reference probe against the suspect server.
//!
//! The probe opens its own TLS 1.3 session to the suspect, shaped by the
//! victim's ClientHello (SNI and ALPN offers), elicits the post-handshake
//! NewSessionTicket flight with a single application payload, and reports
//! the per-record ticket lengths. Those lengths are the reference the
//! upstream watcher compares the relayed connection against.
//!
//! rustls is driven record by record over the socket rather than through a
//! stream wrapper: TLS streams hide record boundaries, and the record
//! boundary is the one thing the probe is here to measure.

use std::io::{self, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, IoState, SignatureScheme};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use camoscan_wire::{
    u16_from_be_slice, ClientHelloSummary, RecordHeader, CONTENT_TYPE_APPLICATION_DATA,
    RECORD_HEADER_LEN,
};

use super::ENCRYPTED_RECORD_OVERHEAD;

/// HTTP/2 client connection preface, sent verbatim when the suspect
/// negotiates `h2`.
const H2_CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Probe failures. Any of these abandons detection for the victim
/// connection; the victim socket is closed without relaying.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe socket error: {0}")]
    Io(#[from] io::Error),

    #[error("probe TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("invalid probe server name: {0}")]
    ServerName(String),
}

/// Measure the suspect's session-ticket record lengths.
///
/// Returns the inner data length of each NewSessionTicket record, in
/// arrival order. An empty result means the handshake and request succeeded
/// but the server issued no tickets before its first response byte.
pub async fn probe_tickets(
    remote: &str,
    hello: &ClientHelloSummary,
) -> Result<Vec<u16>, ProbeError> {
    let host = hello
        .sni
        .clone()
        .unwrap_or_else(|| host_of(remote).to_string());
    let server_name = ServerName::try_from(host.clone())
        .map_err(|_| ProbeError::ServerName(host.clone()))?;

    let provider = Arc::new(ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoCertificateVerification::new(
            (*provider).clone(),
        )))
        .with_no_client_auth();
    // The probe is diagnostic: only ticket sizes matter, so the server's
    // certificate is accepted as-is and the victim's ALPN offers are
    // forwarded unmodified.
    config.alpn_protocols = hello.alpn.clone();

    let mut conn = ClientConnection::new(Arc::new(config), server_name)?;
    let mut stream = TcpStream::connect(remote).await?;

    let mut record_buf = Vec::with_capacity(4096);
    let mut out_buf = Vec::with_capacity(4096);

    drive_handshake(&mut conn, &mut stream, &mut record_buf, &mut out_buf).await?;
    debug!(host = %host, alpn = ?conn.alpn_protocol(), "probe handshake complete");

    send_elicitor(&mut conn, &mut stream, &host, &mut out_buf).await?;
    let tickets_lens = collect_ticket_lens(&mut conn, &mut stream, &mut record_buf).await?;
    debug!(?tickets_lens, "probe finished");
    Ok(tickets_lens)
}

/// Run the TLS handshake to completion, one record at a time.
async fn drive_handshake(
    conn: &mut ClientConnection,
    stream: &mut TcpStream,
    record_buf: &mut Vec<u8>,
    out_buf: &mut Vec<u8>,
) -> Result<(), ProbeError> {
    while conn.is_handshaking() || conn.wants_write() {
        if conn.wants_write() {
            out_buf.clear();
            conn.write_tls(out_buf)?;
            stream.write_all(out_buf).await?;
            continue;
        }
        let header = read_record_into(stream, record_buf).await?;
        trace!(
            content_type = header.content_type,
            record_len = header.len,
            "probe handshake record"
        );
        feed_record(conn, record_buf)?;
    }
    Ok(())
}

/// Send the one application payload that makes servers flush their
/// NewSessionTicket flight: the h2 preface if ALPN chose HTTP/2, otherwise
/// a single HTTP/1.1 GET.
async fn send_elicitor(
    conn: &mut ClientConnection,
    stream: &mut TcpStream,
    host: &str,
    out_buf: &mut Vec<u8>,
) -> Result<(), ProbeError> {
    if conn.alpn_protocol() == Some(&b"h2"[..]) {
        conn.writer().write_all(H2_CLIENT_PREFACE)?;
    } else {
        let request = format!(
            "GET / HTTP/1.1\r\nHost: {host}\r\nAccept: */*\r\nConnection: keep-alive\r\n\r\n"
        );
        conn.writer().write_all(request.as_bytes())?;
    }
    while conn.wants_write() {
        out_buf.clear();
        conn.write_tls(out_buf)?;
        stream.write_all(out_buf).await?;
    }
    Ok(())
}

/// Read records until the first plaintext byte comes back. Every encrypted
/// record consumed on the way without producing plaintext is a session
/// ticket; its inner length goes into the reference list.
async fn collect_ticket_lens(
    conn: &mut ClientConnection,
    stream: &mut TcpStream,
    record_buf: &mut Vec<u8>,
) -> Result<Vec<u16>, ProbeError> {
    let mut tickets_lens = Vec::new();
    loop {
        let header = read_record_into(stream, record_buf).await?;
        let state = feed_record(conn, record_buf)?;
        if state.plaintext_bytes_to_read() > 0 {
            // The zero-purpose read is satisfied; the reference is complete.
            break;
        }
        if state.peer_has_closed() {
            break;
        }
        if header.content_type == CONTENT_TYPE_APPLICATION_DATA {
            trace!(record_len = header.len, "session ticket record");
            tickets_lens.push(header.len.saturating_sub(ENCRYPTED_RECORD_OVERHEAD));
        }
    }
    Ok(tickets_lens)
}

/// Read one whole TLS record (header and payload) into `buf`.
async fn read_record_into(stream: &mut TcpStream, buf: &mut Vec<u8>) -> io::Result<RecordHeader> {
    let mut header = [0u8; RECORD_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let parsed = RecordHeader {
        content_type: header[0],
        version: u16_from_be_slice(&header[1..3]),
        len: u16_from_be_slice(&header[3..5]),
    };
    buf.clear();
    buf.extend_from_slice(&header);
    buf.resize(RECORD_HEADER_LEN + parsed.len as usize, 0);
    stream.read_exact(&mut buf[RECORD_HEADER_LEN..]).await?;
    Ok(parsed)
}

/// Hand one complete record to rustls and process it.
fn feed_record(conn: &mut ClientConnection, record: &[u8]) -> Result<IoState, ProbeError> {
    let mut cursor = io::Cursor::new(record);
    while (cursor.position() as usize) < record.len() {
        if conn.read_tls(&mut cursor)? == 0 {
            break;
        }
    }
    Ok(conn.process_new_packets()?)
}

/// Host part of a `host:port` endpoint, tolerating bracketed IPv6.
fn host_of(remote: &str) -> &str {
    if let Some(rest) = remote.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match remote.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => remote,
    }
}

/// Accept any server certificate. The probe only measures record sizes;
/// authenticity of the suspect is explicitly not required.
#[derive(Debug)]
struct NoCertificateVerification(CryptoProvider);

impl NoCertificateVerification {
    fn new(provider: CryptoProvider) -> Self {
        Self(provider)
    }
}

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_of_endpoint_forms() {
        assert_eq!(host_of("example.com:443"), "example.com");
        assert_eq!(host_of("127.0.0.1:10443"), "127.0.0.1");
        assert_eq!(host_of("[::1]:10443"), "::1");
        assert_eq!(host_of("example.com"), "example.com");
    }
}
