//! Module that contains the command line interface used to launch peers and the printer server.

use crate::{
    error::{Error, Result},
    ProcessId,
};
use clap::{Args, Parser, Subcommand};
use std::{collections::BTreeMap, str::FromStr, time::Duration};

#[derive(Debug, Parser)]
#[command(name = "ricart-agrawala", version, about = "Ricart-Agrawala mutual exclusion over a shared printer")]
pub struct Cli {
    /// Print debug messages.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a peer that periodically competes for the printer.
    Peer(PeerArgs),
    /// Run the shared printer server.
    Printer(PrinterArgs),
}

#[derive(Debug, Clone, Args)]
pub struct PeerArgs {
    /// Identity of this process, unique across the session.
    #[arg(long)]
    pub id: ProcessId,

    /// Port on which this process accepts requests from other peers.
    #[arg(long)]
    pub port: u16,

    /// Address of the printer server, as HOST:PORT.
    #[arg(long)]
    pub server: String,

    /// Another peer of the session, as ID:HOST:PORT. Repeat for every peer.
    #[arg(long = "peer", value_name = "ID:HOST:PORT")]
    pub peers: Vec<PeerAddress>,

    /// Give up waiting on a peer's grant after this many milliseconds.
    #[arg(long)]
    pub quorum_timeout_ms: Option<u64>,

    /// Average number of printer requests per second. Uses a uniform 5-12 s gap when omitted.
    #[arg(long, value_parser = parse_rate)]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Args)]
pub struct PrinterArgs {
    #[arg(long, default_value_t = 50051)]
    pub port: u16,

    /// Shortest time a print job takes, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    pub min_delay_ms: u64,

    /// Longest time a print job takes, in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub max_delay_ms: u64,
}

/// Struct that represents one `ID:HOST:PORT` entry of the peer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub id: ProcessId,
    pub address: String,
}

impl FromStr for PeerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidPeerAddress(s.to_string());

        let (id, address) = s.split_once(':').ok_or_else(invalid)?;
        let id = id.trim().parse::<ProcessId>().map_err(|_| invalid())?;

        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(Self {
                id,
                address: address.to_string(),
            }),
            _ => Err(invalid()),
        }
    }
}

/// Function that accepts only finite, positive request rates.
pub fn parse_rate(s: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(rate) if rate.is_finite() && rate > 0.0 => Ok(rate),
        _ => Err(Error::InvalidRate(s.to_string())),
    }
}

impl PeerArgs {
    /// Function that builds the fixed `(id -> address)` table of the other peers.
    pub fn peer_table(&self) -> Result<BTreeMap<ProcessId, String>> {
        let mut table = BTreeMap::new();

        for peer in &self.peers {
            if peer.id == self.id {
                return Err(Error::SelfPeer(peer.id));
            }
            if table.insert(peer.id, peer.address.clone()).is_some() {
                return Err(Error::DuplicatePeer(peer.id));
            }
        }

        Ok(table)
    }

    pub fn listen_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn quorum_timeout(&self) -> Option<Duration> {
        self.quorum_timeout_ms.map(Duration::from_millis)
    }
}

impl PrinterArgs {
    pub fn listen_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }

    pub fn delay_range(&self) -> (u64, u64) {
        (self.min_delay_ms, self.max_delay_ms.max(self.min_delay_ms))
    }
}
