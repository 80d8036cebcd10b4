use crate::{
    config::PeerArgs,
    coordinator::{Coordinator, Outcome},
    error::Result,
    gateway::{framed, incoming, next_connection, Connection, TcpPeerGateway, TcpResourceGateway},
    handler::InboundHandler,
    log,
    message::{JsonLine, PeerMessage},
    poisson::Schedule,
    state::Process,
    ProcessId,
};
use color_print::cformat;
use futures::{SinkExt, Stream, StreamExt};
use std::{collections::BTreeMap, io, net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct Peer {
    pub id: ProcessId,
    pub address: String,
    pub server_address: String,
    pub peers: BTreeMap<ProcessId, String>,
    pub quorum_timeout: Option<Duration>,
    pub rate: Option<f64>,
}

impl Peer {
    pub fn new(
        id: ProcessId,
        address: String,
        server_address: String,
        peers: BTreeMap<ProcessId, String>,
    ) -> Self {
        Self {
            id,
            address,
            server_address,
            peers,
            quorum_timeout: None,
            rate: None,
        }
    }

    pub fn from_args(args: &PeerArgs) -> Result<Self> {
        Ok(Self {
            quorum_timeout: args.quorum_timeout(),
            rate: args.rate,
            ..Self::new(
                args.id,
                args.listen_address(),
                args.server.clone(),
                args.peer_table()?,
            )
        })
    }

    /// Function that runs the peer until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.address).await?;
        let process = Arc::new(Process::new(self.id));

        log::info(&cformat!(
            "<bold>[{}]</bold> Mutual exclusion service listening on <bold>{}</bold>, printer at <bold>{}</bold>, <bold>{}</bold> peers.",
            self.id,
            self.address,
            self.server_address,
            self.peers.len()
        ));

        let handler = InboundHandler::new(Arc::clone(&process), shutdown.clone());
        let coordinator = Coordinator::new(
            process,
            Arc::new(TcpPeerGateway::new(self.peers)),
            Arc::new(TcpResourceGateway::new(self.server_address)),
        )
        .with_quorum_timeout(self.quorum_timeout);

        let schedule = match self.rate {
            Some(rate) => Schedule::poisson(rate),
            None => Schedule::uniform(),
        };

        // thread that answers the other peers
        let listener_thread = tokio::spawn(serve(listener, handler, shutdown.clone()));

        // thread that competes for the printer
        let simulation_thread = tokio::spawn(simulate(coordinator, schedule, shutdown));

        if listener_thread.await.is_err() {
            log::error("Listener Thread failed.");
        }
        if simulation_thread.await.is_err() {
            log::error("Simulation Thread failed.");
        }

        Ok(())
    }
}

/// Function that accepts peer connections and spawns one handler task per connection.
pub async fn serve(listener: TcpListener, handler: InboundHandler, shutdown: CancellationToken) {
    serve_incoming(incoming(listener), handler, shutdown).await
}

/// Function that serves every connection of `incoming` until `shutdown` is cancelled.
/// Accept errors never end the loop.
pub async fn serve_incoming<S>(incoming: S, handler: InboundHandler, shutdown: CancellationToken)
where
    S: Stream<Item = io::Result<Connection>>,
{
    let mut incoming = std::pin::pin!(incoming);

    while let Some((stream, address)) = next_connection(&mut incoming, &shutdown).await {
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, address, handler).await {
                log::error(&format!("Connection with {address} failed: {e}"));
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    address: SocketAddr,
    handler: InboundHandler,
) -> Result<()> {
    let mut lines = framed(stream);

    let Some(line) = lines.next().await.transpose()? else {
        return Ok(());
    };

    let message = match PeerMessage::from_json_string(&line) {
        Ok(message) => message,
        Err(e) => {
            log::warn(&format!("Dropping malformed message from {address}: {e}"));
            return Ok(());
        }
    };

    if let Some(reply) = handler.handle(message).await {
        lines.send(reply.to_json_string()?).await?;
    }

    Ok(())
}

/// Function that asks for the printer on every tick of `schedule` until shutdown.
pub async fn simulate(coordinator: Coordinator, mut schedule: Schedule, shutdown: CancellationToken) {
    let id = coordinator.process().id();
    let mut delay = schedule.initial_delay();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }

        if coordinator.request_critical_section(&shutdown).await == Outcome::Abandoned {
            break;
        }

        delay = schedule.next_delay();
    }

    log::info(&cformat!("<bold>[{id}]</bold> Simulation loop interrupted."));
}
