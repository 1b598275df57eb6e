pub mod config;
pub mod scan;

pub use config::{Config, VictimProtocol, CLIENT_FINISHED_SIZES};
pub use scan::{
    handle_connection, probe_tickets, relay, scan_with_reference, DownstreamWatcher, ProbeError,
    RecordFramer, RecordInspector, ScanError, ScanOutcome, UpstreamWatcher,
};
