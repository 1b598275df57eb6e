//! Streaming TLS record framer.
//!
//! One framer wraps each relay direction. Bytes pass through untouched; the
//! framer only tracks record boundaries so its inspector sees every record's
//! declared length exactly once, however the network fragments the stream
//! across reads.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

use camoscan_wire::{u16_from_be_slice, RECORD_HEADER_LEN};

/// Observer invoked at every TLS record boundary on one relay direction.
pub trait RecordInspector {
    /// Called once per record with the record's declared payload length.
    fn on_record(&mut self, record_len: u16);

    /// Once this returns true the framer forwards bytes without inspection.
    fn finished(&self) -> bool;
}

/// TLS record framer over one direction of a relayed connection.
///
/// The framer is a pass-through: it must never hold back bytes the relay has
/// to forward, so each [`read`](RecordFramer::read) returns the chunk it got
/// from the source as soon as the inspector has seen the record boundaries
/// inside it. When a record straddles the end of a chunk, the missing tail
/// is fetched from the source into an internal buffer and yielded by the
/// next call, which keeps every source read aligned on a record boundary.
pub struct RecordFramer<R, I> {
    source: R,
    inspector: I,
    /// Tail of a record that straddled the previous chunk.
    pending: Vec<u8>,
    pending_off: usize,
    /// Set when a tail completion hit end-of-stream.
    eof: bool,
}

impl<R: AsyncRead + Unpin, I: RecordInspector> RecordFramer<R, I> {
    pub fn new(source: R, inspector: I) -> Self {
        Self {
            source,
            inspector,
            pending: Vec::new(),
            pending_off: 0,
            eof: false,
        }
    }

    pub fn inspector(&self) -> &I {
        &self.inspector
    }

    /// Read the next chunk of the stream into `buf`.
    ///
    /// Performs at most one read against the source, plus whatever tail
    /// completion is needed to end on a record boundary. Returns `Ok(0)` at
    /// end of stream.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Yield the completed-record tail from the previous call first.
        if self.pending_off < self.pending.len() {
            let rest = &self.pending[self.pending_off..];
            let n = rest.len().min(buf.len());
            buf[..n].copy_from_slice(&rest[..n]);
            self.pending_off += n;
            if self.pending_off == self.pending.len() {
                self.pending.clear();
                self.pending_off = 0;
            }
            return Ok(n);
        }
        if self.eof {
            return Ok(0);
        }

        let n = self.source.read(buf).await?;
        if n == 0 {
            return Ok(0);
        }
        if self.inspector.finished() {
            return Ok(n);
        }

        let mut pos = 0;
        while pos < n && !self.inspector.finished() {
            // Record header split across the chunk edge: complete it from
            // the source, then treat the whole payload as missing.
            if pos + RECORD_HEADER_LEN > n {
                let mut header = [0u8; RECORD_HEADER_LEN];
                let have = n - pos;
                header[..have].copy_from_slice(&buf[pos..n]);
                if !self.complete_tail(&mut header[have..]).await? {
                    return Ok(n);
                }
                let record_len = u16_from_be_slice(&header[3..5]);
                self.inspector.on_record(record_len);

                let mut tail = header[have..].to_vec();
                let payload_start = tail.len();
                tail.resize(payload_start + record_len as usize, 0);
                if self.complete_tail(&mut tail[payload_start..]).await? {
                    self.pending = tail;
                }
                return Ok(n);
            }

            let record_len = u16_from_be_slice(&buf[pos + 3..pos + 5]);
            self.inspector.on_record(record_len);

            let record_end = pos + RECORD_HEADER_LEN + record_len as usize;
            if record_end > n {
                // Payload split across the chunk edge.
                let mut tail = vec![0u8; record_end - n];
                if self.complete_tail(&mut tail).await? {
                    self.pending = tail;
                }
                return Ok(n);
            }
            pos = record_end;
        }

        Ok(n)
    }

    /// Fill `out` from the source. An end-of-stream underflow marks the
    /// framer as exhausted and returns `Ok(false)`; other errors propagate.
    async fn complete_tail(&mut self, out: &mut [u8]) -> io::Result<bool> {
        if out.is_empty() {
            return Ok(true);
        }
        match self.source.read_exact(out).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                self.eof = true;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
