//! The record-level detection engine.
//!
//! Composition per connection: a [`RecordFramer`] on each relay direction
//! feeds a watcher; the probe supplies the reference ticket lengths; the
//! session orchestrator wires them together.

mod framer;
mod probe;
mod session;
mod watcher;

pub use framer::{RecordFramer, RecordInspector};
pub use probe::{probe_tickets, ProbeError};
pub use session::{handle_connection, relay, scan_with_reference, ScanError, ScanOutcome};
pub use watcher::{DownstreamWatcher, UpstreamWatcher, VERDICT_DETECTED};

/// Overhead of a TLS 1.3 encrypted record beyond its inner data: one inner
/// content-type byte plus the 16-byte AEAD tag.
pub(crate) const ENCRYPTED_RECORD_OVERHEAD: u16 = 17;
