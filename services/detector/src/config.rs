//! Scanner configuration.
//!
//! The server `Finished` size tables were measured against real ShadowTLS
//! and REALITY deployments. They are plain data, overridable from the CLI,
//! so a new camouflage build can be covered without recompiling.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::ValueEnum;

/// TLS 1.3 client `Finished` record sizes. The client side does not depend
/// on the camouflage family, so this table is fixed.
pub const CLIENT_FINISHED_SIZES: &[u16] = &[53, 69];

/// Camouflage family the suspect server is tested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VictimProtocol {
    /// ShadowTLS v2/v3 style relays.
    Shadowtls,
    /// REALITY (xray) style relays.
    Reality,
}

impl VictimProtocol {
    /// Server `Finished` record sizes observed for this family.
    pub fn server_finished_sizes(self) -> &'static [u16] {
        match self {
            VictimProtocol::Shadowtls => &[57, 73],
            VictimProtocol::Reality => &[53, 69],
        }
    }
}

/// Resolved scanner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address victim connections are accepted on.
    pub listen_addr: SocketAddr,

    /// Address of the suspected camouflage server (host:port, hostname allowed).
    pub remote_addr: String,

    /// Camouflage family under test.
    pub victim: VictimProtocol,

    /// Server `Finished` record sizes the upstream watcher anchors on.
    pub server_finished_sizes: Vec<u16>,

    /// Cap on concurrent victim connections.
    pub max_connections: usize,
}

impl Config {
    /// Build a config for a victim protocol, with an optional override of
    /// its server `Finished` size table.
    pub fn new(
        listen_addr: SocketAddr,
        remote_addr: String,
        victim: VictimProtocol,
        finished_sizes: Option<&str>,
        max_connections: usize,
    ) -> Result<Self> {
        let server_finished_sizes = match finished_sizes {
            Some(s) => parse_finished_sizes(s)?,
            None => victim.server_finished_sizes().to_vec(),
        };
        Ok(Self {
            listen_addr,
            remote_addr,
            victim,
            server_finished_sizes,
            max_connections,
        })
    }
}

/// Parse a comma-separated list of record lengths, e.g. "57,73".
pub fn parse_finished_sizes(s: &str) -> Result<Vec<u16>> {
    let mut sizes = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let size: u16 = part
            .parse()
            .with_context(|| format!("Invalid record size: {}", part))?;
        sizes.push(size);
    }

    if sizes.is_empty() {
        anyhow::bail!("No record sizes given. Expected e.g. '57,73'");
    }

    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_tables_per_family() {
        assert_eq!(VictimProtocol::Shadowtls.server_finished_sizes(), &[57, 73]);
        assert_eq!(VictimProtocol::Reality.server_finished_sizes(), &[53, 69]);
    }

    #[test]
    fn parse_finished_sizes_list() {
        assert_eq!(parse_finished_sizes("57, 73").unwrap(), vec![57, 73]);
        assert!(parse_finished_sizes("57,x").is_err());
        assert!(parse_finished_sizes("").is_err());
    }

    #[test]
    fn override_replaces_table() {
        let config = Config::new(
            "127.0.0.1:10444".parse().unwrap(),
            "127.0.0.1:10443".to_string(),
            VictimProtocol::Reality,
            Some("61,77"),
            256,
        )
        .unwrap();
        assert_eq!(config.server_finished_sizes, vec![61, 77]);
    }
}
