//! Per-direction record watchers.
//!
//! The downstream watcher (victim -> suspect) looks for the client
//! `Finished` record and raises the cross-direction flag. The upstream
//! watcher (suspect -> victim) anchors on the server `Finished`, then
//! compares each following record against the reference ticket lengths from
//! the probe and prints the verdict on the first mismatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::config::CLIENT_FINISHED_SIZES;

use super::framer::RecordInspector;
use super::ENCRYPTED_RECORD_OVERHEAD;

/// The one user-visible detection message.
pub const VERDICT_DETECTED: &str = "TLS camouflage connection detected";

/// Victim -> suspect direction.
///
/// Owns the write side of the cross-direction flag. The TLS 1.3 client
/// `Finished` is the first encrypted record from the client and its size is
/// tightly bounded, so a size match is enough to know the handshake records
/// from the server are over.
pub struct DownstreamWatcher {
    client_finished_seen: Arc<AtomicBool>,
    done: bool,
}

impl DownstreamWatcher {
    pub fn new(client_finished_seen: Arc<AtomicBool>) -> Self {
        Self {
            client_finished_seen,
            done: false,
        }
    }
}

impl RecordInspector for DownstreamWatcher {
    fn on_record(&mut self, record_len: u16) {
        if CLIENT_FINISHED_SIZES.contains(&record_len) {
            self.client_finished_seen.store(true, Ordering::Release);
            self.done = true;
            debug!(record_len, "client Finished passed downstream");
        }
    }

    fn finished(&self) -> bool {
        self.done
    }
}

/// Suspect -> victim direction.
///
/// `status` counts progress through the reference tickets: 0 awaits the
/// server `Finished` (or the downstream flag), `k` means the next record is
/// compared against `tickets_lens[k - 1]`, and `tickets_lens.len() + 1` is
/// terminal. Status never decreases.
pub struct UpstreamWatcher {
    status: usize,
    tickets_lens: Vec<u16>,
    server_finished_sizes: Vec<u16>,
    client_finished_seen: Arc<AtomicBool>,
    detected: bool,
}

impl UpstreamWatcher {
    pub fn new(
        tickets_lens: Vec<u16>,
        server_finished_sizes: Vec<u16>,
        client_finished_seen: Arc<AtomicBool>,
    ) -> Self {
        assert!(!tickets_lens.is_empty(), "reference tickets required");
        Self {
            status: 0,
            tickets_lens,
            server_finished_sizes,
            client_finished_seen,
            detected: false,
        }
    }

    /// Whether the verdict fired on this connection.
    pub fn detected(&self) -> bool {
        self.detected
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> usize {
        self.status
    }

    fn terminal(&self) -> usize {
        self.tickets_lens.len() + 1
    }
}

impl RecordInspector for UpstreamWatcher {
    fn on_record(&mut self, record_len: u16) {
        if self.finished() {
            return;
        }

        // Anchor on the server Finished. Only honored before ticket counting
        // starts; a ticket-sized coincidence later must not move the status
        // backwards.
        if self.status <= 1 && self.server_finished_sizes.contains(&record_len) {
            if self.status == 0 {
                debug!(record_len, "server Finished shape matched");
            }
            self.status = 1;
            return;
        }

        if self.status == 0 {
            if !self.client_finished_seen.load(Ordering::Acquire) {
                // Still mid-handshake from the server; nothing to compare.
                return;
            }
            // The client Finished passed downstream, so this record is
            // post-handshake even though the server Finished shape was
            // missed. Compare it as ticket 0.
            debug!(record_len, "anchoring on downstream client Finished");
            self.status = 1;
        }

        let data_len = i64::from(record_len) - i64::from(ENCRYPTED_RECORD_OVERHEAD);
        let expected = i64::from(self.tickets_lens[self.status - 1]);

        if data_len == expected {
            self.status += 1;
            if self.status == self.terminal() {
                debug!("all session ticket lengths matched");
            }
        } else if data_len == expected * self.tickets_lens.len() as i64 {
            // Some CDNs (Cloudflare) batch every ticket into one record.
            debug!(record_len, "batched session tickets matched");
            self.status = self.terminal();
        } else {
            println!("{}", VERDICT_DETECTED);
            debug!(record_len, expected, "ticket length mismatch");
            self.detected = true;
            self.status = self.terminal();
        }
    }

    fn finished(&self) -> bool {
        self.status >= self.terminal()
    }
}
