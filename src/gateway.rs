//! Module that contains the RPC boundary towards other peers and towards the printer server.
//!
//! The coordinator only talks to the traits in this module. The TCP implementations open one
//! connection per call, write one JSON line and read one JSON line back.

use crate::{
    error::{Error, Result},
    log,
    message::{AccessRequest, AccessResponse, JsonLine, PeerMessage, PeerReply, PrintRequest, PrintResponse},
    ProcessId,
};
use async_trait::async_trait;
use futures::{SinkExt, Stream, StreamExt};
use std::{collections::BTreeMap, io, net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{
    codec::{Framed, LinesCodec},
    sync::CancellationToken,
};

/// Maximum length of a single JSON line accepted on any connection.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024;

/// Pause after a failed `accept`, e.g. while the process is out of file descriptors.
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub type Connection = (TcpStream, SocketAddr);

/// Trait for sending access requests to the other peers of the session.
#[async_trait]
pub trait PeerGateway: Send + Sync {
    /// Function that lists every other peer of the session.
    fn peers(&self) -> Vec<ProcessId>;

    /// Function that asks `peer` for permission and waits for its grant.
    async fn request_access(&self, peer: ProcessId, request: AccessRequest) -> Result<AccessResponse>;
}

/// Trait for submitting work to the shared printer.
#[async_trait]
pub trait ResourceGateway: Send + Sync {
    async fn print(&self, request: PrintRequest) -> Result<PrintResponse>;
}

/// Function that turns a listener into an endless stream of accepted connections.
pub fn incoming(listener: TcpListener) -> impl Stream<Item = io::Result<Connection>> + Send {
    futures::stream::unfold(listener, |listener| async move {
        let accepted = listener.accept().await;
        Some((accepted, listener))
    })
}

/// Function that waits for the next connection of `incoming`.
///
/// A failed accept is logged and retried after [`ACCEPT_BACKOFF`]. Returns `None` once
/// `shutdown` is cancelled or `incoming` ends.
pub async fn next_connection<S>(incoming: &mut S, shutdown: &CancellationToken) -> Option<Connection>
where
    S: Stream<Item = io::Result<Connection>> + Unpin,
{
    loop {
        let accepted = tokio::select! {
            accepted = incoming.next() => accepted?,
            _ = shutdown.cancelled() => return None,
        };

        match accepted {
            Ok(connection) => return Some(connection),
            Err(e) => {
                log::warn(&format!("Failed to accept a connection: {e}"));
                tokio::select! {
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    _ = shutdown.cancelled() => return None,
                }
            }
        }
    }
}

/// Function that wraps a TCP stream in the line codec used by every connection.
pub fn framed(stream: TcpStream) -> Framed<TcpStream, LinesCodec> {
    Framed::new(stream, LinesCodec::new_with_max_length(MAX_FRAME_LENGTH))
}

/// Function that performs a single request/reply exchange with `address`.
pub async fn call<Req: JsonLine, Resp: JsonLine>(address: &str, request: &Req) -> Result<Resp> {
    let stream = TcpStream::connect(address).await?;
    let mut lines = framed(stream);

    lines.send(request.to_json_string()?).await?;

    match lines.next().await {
        Some(Ok(line)) => Resp::from_json_string(&line),
        Some(Err(e)) => Err(e.into()),
        None => Err(Error::ConnectionClosed),
    }
}

/// Peer gateway backed by the fixed `(id -> address)` table given at launch.
#[derive(Debug, Clone)]
pub struct TcpPeerGateway {
    addresses: BTreeMap<ProcessId, String>,
}

impl TcpPeerGateway {
    pub fn new(addresses: BTreeMap<ProcessId, String>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl PeerGateway for TcpPeerGateway {
    fn peers(&self) -> Vec<ProcessId> {
        self.addresses.keys().copied().collect()
    }

    async fn request_access(&self, peer: ProcessId, request: AccessRequest) -> Result<AccessResponse> {
        let address = self.addresses.get(&peer).ok_or(Error::UnknownPeer(peer))?;

        match call::<_, PeerReply>(address, &PeerMessage::Request(request)).await? {
            PeerReply::Grant(response) => Ok(response),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

/// Resource gateway that submits jobs to the printer server over TCP.
#[derive(Debug, Clone)]
pub struct TcpResourceGateway {
    address: String,
}

impl TcpResourceGateway {
    pub fn new(address: String) -> Self {
        Self { address }
    }
}

#[async_trait]
impl ResourceGateway for TcpResourceGateway {
    async fn print(&self, request: PrintRequest) -> Result<PrintResponse> {
        call(&self.address, &request).await
    }
}
