//! Module that contains all the different message types sent in the network.
//!
//! Every message travels as a single line of JSON. Peers exchange [`PeerMessage`] and
//! [`PeerReply`], the printer server exchanges [`PrintRequest`] and [`PrintResponse`].

use crate::{error::Result, log, LogicalTimestamp, ProcessId};
use color_print::cformat;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Trait for messages that are encoded as one JSON line on the wire.
pub trait JsonLine: Serialize + DeserializeOwned {
    /// Function that returns the message as a JSON formatted `String`.
    fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Function that parses the message from a JSON formatted `String`.
    fn from_json_string(line: &str) -> Result<Self> {
        Ok(serde_json::from_str::<Self>(line)?)
    }
}

/// Struct that represents the permission request broadcast by a process that wants the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub client_id: ProcessId,
    pub timestamp: LogicalTimestamp,
    pub request_number: u64,
}

/// Struct that represents the grant a peer sends back once it no longer objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessResponse {
    pub timestamp: LogicalTimestamp,
}

/// Struct that represents an explicit release notice.
///
/// Accepted for compatibility; it only advances the receiver's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRelease {
    pub client_id: ProcessId,
    pub timestamp: LogicalTimestamp,
}

/// Enum that represents everything a peer can receive from another peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerMessage {
    Request(AccessRequest),
    Release(AccessRelease),
}

/// Enum that represents the replies a peer sends back on the same connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerReply {
    Grant(AccessResponse),
    Ack,
}

/// Struct that represents a job sent to the printer server while holding the critical section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintRequest {
    pub client_id: ProcessId,
    pub message_content: String,
    pub timestamp: LogicalTimestamp,
    pub request_number: u64,
}

/// Struct that represents the printer server's confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintResponse {
    pub success: bool,
    pub confirmation_message: String,
}

impl JsonLine for PeerMessage {}
impl JsonLine for PeerReply {}
impl JsonLine for PrintRequest {}
impl JsonLine for PrintResponse {}

impl AccessRequest {
    pub fn new(client_id: ProcessId, timestamp: LogicalTimestamp, request_number: u64) -> Self {
        Self {
            client_id,
            timestamp,
            request_number,
        }
    }
}

impl PrintRequest {
    /// Function that builds the job a client prints on every critical section entry.
    pub fn job(client_id: ProcessId, timestamp: LogicalTimestamp, request_number: u64) -> Self {
        Self {
            client_id,
            message_content: format!("Distributed systems job - client {client_id} printing."),
            timestamp,
            request_number,
        }
    }

    /// Function that computes the confirmation for a finished job.
    pub fn to_response(&self) -> PrintResponse {
        PrintResponse {
            success: true,
            confirmation_message: format!(
                "Message printed successfully for client {}",
                self.client_id
            ),
        }
    }

    /// Function that prints a job.
    pub fn print(&self) {
        log::info(&cformat!(
            "PRINTING... <bold>[TS: {}]</bold> client <bold>{}</bold>: {} (Req: <bold>{}</bold>)",
            self.timestamp,
            self.client_id,
            self.message_content,
            self.request_number
        ));
    }
}

impl PrintResponse {
    /// Function that builds the reply for a line the printer could not understand.
    pub fn malformed() -> Self {
        Self {
            success: false,
            confirmation_message: String::from("The request had incorrect formatting."),
        }
    }

    /// Function that prints a response from the printer server.
    pub fn print(&self) {
        match self.success {
            true => log::info(&cformat!(
                "Printer answered: <bold>{}</bold>",
                self.confirmation_message
            )),
            false => log::error(&self.confirmation_message),
        }
    }
}
