pub mod clock;
pub mod config;
pub mod coordinator;
pub mod deferred;
pub mod error;
pub mod gateway;
pub mod handler;
pub mod log;
pub mod message;
pub mod peer;
pub mod poisson;
pub mod server;
pub mod state;

/// Identity of a peer, fixed for the whole session.
pub type ProcessId = u32;

/// Value of a Lamport clock.
pub type LogicalTimestamp = u64;
