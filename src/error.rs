//! Module that contains the error type shared by the transport, the gateways and bootstrap.

use std::time::Duration;
use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::ProcessId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed before a reply was received")]
    ConnectionClosed,

    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("no address known for peer {0}")]
    UnknownPeer(ProcessId),

    #[error("invalid peer address `{0}`, expected ID:HOST:PORT")]
    InvalidPeerAddress(String),

    #[error("peer {0} is listed more than once")]
    DuplicatePeer(ProcessId),

    #[error("peer {0} is this process")]
    SelfPeer(ProcessId),

    #[error("invalid rate `{0}`, expected a positive number of requests per second")]
    InvalidRate(String),
}
