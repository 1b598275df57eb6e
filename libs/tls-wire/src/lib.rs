//! TLS wire-format helpers for camoscan.
//!
//! This library provides the small amount of TLS parsing the scanner needs:
//! - record header fields (the detection engine only ever uses the length)
//! - ClientHello summaries (SNI and ALPN offers) for the reference probe
//!
//! Nothing here decrypts or re-serializes TLS; payloads are opaque bytes.

use thiserror::Error;

/// Length of a TLS record header: content type (1), legacy version (2),
/// payload length (2, big-endian).
pub const RECORD_HEADER_LEN: usize = 5;

/// TLS record content type: ChangeCipherSpec.
pub const CONTENT_TYPE_CHANGE_CIPHER_SPEC: u8 = 0x14;
/// TLS record content type: Alert.
pub const CONTENT_TYPE_ALERT: u8 = 0x15;
/// TLS record content type: Handshake.
pub const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
/// TLS record content type: ApplicationData. In TLS 1.3 every encrypted
/// record is typed as ApplicationData regardless of its inner content.
pub const CONTENT_TYPE_APPLICATION_DATA: u8 = 0x17;

/// Wire-format parsing errors.
#[derive(Debug, Error)]
pub enum WireError {
    /// Fewer bytes than a complete record header.
    #[error("truncated record header: {0} bytes")]
    TruncatedHeader(usize),

    /// Record payload shorter than its declared length.
    #[error("truncated record: declared {declared} bytes, have {have}")]
    TruncatedRecord { declared: usize, have: usize },

    /// The record is not a handshake ClientHello.
    #[error("not a ClientHello record")]
    NotAClientHello,

    /// A length field points past the end of the buffer.
    #[error("malformed ClientHello: {0}")]
    Malformed(&'static str),
}

/// Read a big-endian u16 from the first two bytes of a slice.
pub fn u16_from_be_slice(s: &[u8]) -> u16 {
    u16::from_be_bytes([s[0], s[1]])
}

/// A parsed TLS record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Content type byte (see the `CONTENT_TYPE_*` constants).
    pub content_type: u8,
    /// Legacy protocol version, e.g. 0x0303.
    pub version: u16,
    /// Declared payload length; the record occupies `RECORD_HEADER_LEN + len`
    /// bytes on the wire.
    pub len: u16,
}

impl RecordHeader {
    /// Parse a record header from the first five bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < RECORD_HEADER_LEN {
            return Err(WireError::TruncatedHeader(buf.len()));
        }
        Ok(Self {
            content_type: buf[0],
            version: u16_from_be_slice(&buf[1..3]),
            len: u16_from_be_slice(&buf[3..5]),
        })
    }
}

// ============================================================================
// ClientHello summary
// ============================================================================

/// TLS extension id: server_name.
const EXT_SERVER_NAME: u16 = 0x0000;
/// TLS extension id: application_layer_protocol_negotiation.
const EXT_ALPN: u16 = 0x0010;

/// The ClientHello fields that shape a server's ticket-issuing behavior.
///
/// The scanner replays the raw ClientHello bytes verbatim on the relay path;
/// this summary only feeds the reference probe, which opens its own
/// handshake with the same SNI and ALPN offers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHelloSummary {
    /// Server Name Indication, normalized to lowercase without a trailing dot.
    pub sni: Option<String>,
    /// ALPN protocol offers in client preference order, e.g. `h2`, `http/1.1`.
    pub alpn: Vec<Vec<u8>>,
}

/// Parse a complete ClientHello record (header included) into a summary.
///
/// ClientHello layout after the record header:
/// - handshake type (1, 0x01) + length (3)
/// - client version (2) + random (32)
/// - session ID length (1) + session ID
/// - cipher suites length (2) + cipher suites
/// - compression methods length (1) + methods
/// - extensions length (2) + extensions
pub fn parse_client_hello(record: &[u8]) -> Result<ClientHelloSummary, WireError> {
    let header = RecordHeader::parse(record)?;
    if header.content_type != CONTENT_TYPE_HANDSHAKE {
        return Err(WireError::NotAClientHello);
    }
    let body = &record[RECORD_HEADER_LEN..];
    if body.len() < header.len as usize {
        return Err(WireError::TruncatedRecord {
            declared: header.len as usize,
            have: body.len(),
        });
    }

    // Handshake header: type + 24-bit length.
    if body.len() < 4 || body[0] != 0x01 {
        return Err(WireError::NotAClientHello);
    }
    let client_hello = &body[4..];
    if client_hello.len() < 34 {
        return Err(WireError::Malformed("shorter than version + random"));
    }

    // Skip version (2) + random (32).
    let mut pos = 34;

    // Session ID.
    if pos >= client_hello.len() {
        return Err(WireError::Malformed("session id out of bounds"));
    }
    let session_id_len = client_hello[pos] as usize;
    pos += 1 + session_id_len;

    // Cipher suites.
    if pos + 2 > client_hello.len() {
        return Err(WireError::Malformed("cipher suites length out of bounds"));
    }
    let cipher_suites_len = u16_from_be_slice(&client_hello[pos..]) as usize;
    pos += 2 + cipher_suites_len;

    // Compression methods.
    if pos >= client_hello.len() {
        return Err(WireError::Malformed("compression methods out of bounds"));
    }
    let compression_len = client_hello[pos] as usize;
    pos += 1 + compression_len;

    // Extensions.
    let mut summary = ClientHelloSummary::default();
    if pos + 2 > client_hello.len() {
        // A ClientHello without extensions is legal, just useless to us.
        return Ok(summary);
    }
    let extensions_len = u16_from_be_slice(&client_hello[pos..]) as usize;
    pos += 2;
    let extensions_end = (pos + extensions_len).min(client_hello.len());

    while pos + 4 <= extensions_end {
        let ext_type = u16_from_be_slice(&client_hello[pos..]);
        let ext_len = u16_from_be_slice(&client_hello[pos + 2..]) as usize;
        pos += 4;
        if pos + ext_len > extensions_end {
            return Err(WireError::Malformed("extension length out of bounds"));
        }
        let ext = &client_hello[pos..pos + ext_len];
        match ext_type {
            EXT_SERVER_NAME => summary.sni = parse_sni_extension(ext)?,
            EXT_ALPN => summary.alpn = parse_alpn_extension(ext)?,
            _ => {}
        }
        pos += ext_len;
    }

    Ok(summary)
}

/// Extract the hostname from a server_name extension body.
///
/// Layout: list length (2), then entries of name type (1) + name length (2)
/// + name. Only name type 0 (host_name) is defined.
fn parse_sni_extension(data: &[u8]) -> Result<Option<String>, WireError> {
    if data.len() < 2 {
        return Err(WireError::Malformed("sni list length truncated"));
    }
    let list_len = u16_from_be_slice(data) as usize;
    if data.len() < 2 + list_len {
        return Err(WireError::Malformed("sni list out of bounds"));
    }

    let mut pos = 2;
    while pos + 3 <= 2 + list_len {
        let name_type = data[pos];
        let name_len = u16_from_be_slice(&data[pos + 1..]) as usize;
        pos += 3;
        if pos + name_len > data.len() {
            return Err(WireError::Malformed("sni name out of bounds"));
        }
        if name_type == 0 {
            let hostname = std::str::from_utf8(&data[pos..pos + name_len])
                .map_err(|_| WireError::Malformed("sni name not utf-8"))?;
            let normalized = hostname.to_lowercase().trim_end_matches('.').to_string();
            return Ok(Some(normalized));
        }
        pos += name_len;
    }

    Ok(None)
}

/// Extract the protocol list from an ALPN extension body.
///
/// Layout: list length (2), then entries of name length (1) + name.
fn parse_alpn_extension(data: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    if data.len() < 2 {
        return Err(WireError::Malformed("alpn list length truncated"));
    }
    let list_len = u16_from_be_slice(data) as usize;
    if data.len() < 2 + list_len {
        return Err(WireError::Malformed("alpn list out of bounds"));
    }

    let mut protocols = Vec::new();
    let mut pos = 2;
    while pos < 2 + list_len {
        let name_len = data[pos] as usize;
        pos += 1;
        if pos + name_len > 2 + list_len {
            return Err(WireError::Malformed("alpn name out of bounds"));
        }
        protocols.push(data[pos..pos + name_len].to_vec());
        pos += name_len;
    }

    Ok(protocols)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Assemble a syntactically valid ClientHello record with the given SNI
    /// and ALPN offers. Cipher suites and random are filler; the parser never
    /// looks at their contents.
    fn build_client_hello(sni: Option<&str>, alpn: &[&[u8]]) -> Vec<u8> {
        let mut extensions = Vec::new();
        if let Some(name) = sni {
            let mut ext = Vec::new();
            ext.extend_from_slice(&(name.len() as u16 + 3).to_be_bytes()); // list length
            ext.push(0); // host_name
            ext.extend_from_slice(&(name.len() as u16).to_be_bytes());
            ext.extend_from_slice(name.as_bytes());
            extensions.extend_from_slice(&EXT_SERVER_NAME.to_be_bytes());
            extensions.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&ext);
        }
        if !alpn.is_empty() {
            let mut list = Vec::new();
            for proto in alpn {
                list.push(proto.len() as u8);
                list.extend_from_slice(proto);
            }
            let mut ext = Vec::new();
            ext.extend_from_slice(&(list.len() as u16).to_be_bytes());
            ext.extend_from_slice(&list);
            extensions.extend_from_slice(&EXT_ALPN.to_be_bytes());
            extensions.extend_from_slice(&(ext.len() as u16).to_be_bytes());
            extensions.extend_from_slice(&ext);
        }

        let mut hello = Vec::new();
        hello.extend_from_slice(&[0x03, 0x03]); // client version
        hello.extend_from_slice(&[0u8; 32]); // random
        hello.push(0); // session ID length
        hello.extend_from_slice(&2u16.to_be_bytes()); // cipher suites length
        hello.extend_from_slice(&[0x13, 0x01]); // TLS_AES_128_GCM_SHA256
        hello.push(1); // compression methods length
        hello.push(0); // null compression
        hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        hello.extend_from_slice(&extensions);

        let mut body = vec![0x01];
        body.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        body.extend_from_slice(&hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(body.len() as u16).to_be_bytes());
        record.extend_from_slice(&body);
        record
    }

    #[test]
    fn record_header_parse() {
        let header = RecordHeader::parse(&[0x17, 0x03, 0x03, 0x01, 0x90]).unwrap();
        assert_eq!(header.content_type, CONTENT_TYPE_APPLICATION_DATA);
        assert_eq!(header.version, 0x0303);
        assert_eq!(header.len, 400);
    }

    #[test]
    fn record_header_truncated() {
        assert!(matches!(
            RecordHeader::parse(&[0x16, 0x03]),
            Err(WireError::TruncatedHeader(2))
        ));
    }

    #[test]
    fn client_hello_sni_and_alpn() {
        let record = build_client_hello(Some("Example.COM."), &[b"h2", b"http/1.1"]);
        let summary = parse_client_hello(&record).unwrap();
        assert_eq!(summary.sni.as_deref(), Some("example.com"));
        assert_eq!(summary.alpn, vec![b"h2".to_vec(), b"http/1.1".to_vec()]);
    }

    #[test]
    fn client_hello_without_extensions_of_interest() {
        let record = build_client_hello(None, &[]);
        let summary = parse_client_hello(&record).unwrap();
        assert_eq!(summary.sni, None);
        assert!(summary.alpn.is_empty());
    }

    #[test]
    fn rejects_non_handshake_record() {
        let record = [0x17, 0x03, 0x03, 0x00, 0x01, 0x00];
        assert!(matches!(
            parse_client_hello(&record),
            Err(WireError::NotAClientHello)
        ));
    }

    #[test]
    fn rejects_truncated_record() {
        let mut record = build_client_hello(Some("example.com"), &[]);
        record.truncate(record.len() - 4);
        assert!(matches!(
            parse_client_hello(&record),
            Err(WireError::TruncatedRecord { .. })
        ));
    }

    #[test]
    fn rejects_http_bytes() {
        let request = b"GET / HTTP/1.1\r\nHost: example.com\r\n\r\n";
        assert!(parse_client_hello(request).is_err());
    }
}
