use async_trait::async_trait;
use ricart_agrawala::{
    coordinator::{Coordinator, Outcome},
    error::{Error, Result},
    gateway::{call, PeerGateway, ResourceGateway, TcpPeerGateway},
    handler::InboundHandler,
    message::{AccessRelease, AccessRequest, AccessResponse, PeerMessage, PeerReply, PrintRequest, PrintResponse},
    peer::serve,
    state::{MutexState, Process},
    ProcessId,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::Mutex, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Printer that records how many processes are inside it at once.
#[derive(Default)]
struct CountingPrinter {
    inside: AtomicUsize,
    max_inside: AtomicUsize,
    jobs: Mutex<Vec<PrintRequest>>,
}

#[async_trait]
impl ResourceGateway for CountingPrinter {
    async fn print(&self, request: PrintRequest) -> Result<PrintResponse> {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(2)).await;
        let response = request.to_response();
        self.jobs.lock().await.push(request);

        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(response)
    }
}

/// Peer gateway that calls the other processes' handlers directly.
struct LocalPeers {
    handlers: BTreeMap<ProcessId, InboundHandler>,
}

#[async_trait]
impl PeerGateway for LocalPeers {
    fn peers(&self) -> Vec<ProcessId> {
        self.handlers.keys().copied().collect()
    }

    async fn request_access(&self, peer: ProcessId, request: AccessRequest) -> Result<AccessResponse> {
        let handler = self.handlers.get(&peer).ok_or(Error::UnknownPeer(peer))?;
        handler
            .request_access(request)
            .await
            .ok_or(Error::ConnectionClosed)
    }
}

fn local_mesh(
    size: ProcessId,
    printer: Arc<CountingPrinter>,
    shutdown: &CancellationToken,
) -> Vec<Arc<Coordinator>> {
    let processes = (1..=size)
        .map(|id| Arc::new(Process::new(id)))
        .collect::<Vec<_>>();

    processes
        .iter()
        .map(|process| {
            let handlers = processes
                .iter()
                .filter(|other| other.id() != process.id())
                .map(|other| {
                    (
                        other.id(),
                        InboundHandler::new(Arc::clone(other), shutdown.clone()),
                    )
                })
                .collect();

            Arc::new(Coordinator::new(
                Arc::clone(process),
                Arc::new(LocalPeers { handlers }),
                printer.clone(),
            ))
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_process_holds_the_printer() {
    let printer = Arc::new(CountingPrinter::default());
    let shutdown = CancellationToken::new();
    let coordinators = local_mesh(4, Arc::clone(&printer), &shutdown);

    let mut attempts = JoinSet::new();
    for coordinator in &coordinators {
        let coordinator = Arc::clone(coordinator);
        let shutdown = shutdown.clone();
        attempts.spawn(async move {
            for round in 0..5u64 {
                tokio::time::sleep(Duration::from_millis(round % 3)).await;
                let outcome = coordinator.request_critical_section(&shutdown).await;
                assert!(
                    matches!(outcome, Outcome::Completed { ref failed, .. } if failed.is_empty()),
                    "unexpected outcome {outcome:?}"
                );
            }
        });
    }

    let all_done = async {
        while let Some(result) = attempts.join_next().await {
            result.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(30), all_done)
        .await
        .expect("every request must eventually be granted");

    assert_eq!(printer.max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(printer.jobs.lock().await.len(), 20);

    for coordinator in &coordinators {
        let process = coordinator.process();
        assert_eq!(process.state().await, MutexState::Released);
        assert!(process.deferred_peers().await.is_empty());
    }
}

#[tokio::test]
async fn earlier_request_wins_and_later_one_is_deferred() {
    let shutdown = CancellationToken::new();
    let a = Arc::new(Process::new(1));
    let b = Arc::new(Process::new(2));
    let c = Arc::new(Process::new(3));

    // A wants at (ts=5, seq=1), B wants at (ts=6, seq=1), C stays released
    a.clock().observe(3);
    let a_request = a.want().await.unwrap();
    b.clock().observe(4);
    let b_request = b.want().await.unwrap();
    assert_eq!((a_request.timestamp, a_request.sequence_number), (5, 1));
    assert_eq!((b_request.timestamp, b_request.sequence_number), (6, 1));

    let a_handler = InboundHandler::new(Arc::clone(&a), shutdown.clone());
    let b_handler = InboundHandler::new(Arc::clone(&b), shutdown.clone());
    let c_handler = InboundHandler::new(Arc::clone(&c), shutdown.clone());

    // A's request has priority: B and C both grant at once
    assert!(b_handler.request_access(a_request.to_request()).await.is_some());
    assert!(c_handler.request_access(a_request.to_request()).await.is_some());
    assert!(b.deferred_peers().await.is_empty());

    // B's request reaches A, which withholds its grant
    let b_waiting_on_a = {
        let a_handler = a_handler.clone();
        let request = b_request.to_request();
        tokio::spawn(async move { a_handler.request_access(request).await })
    };
    assert!(c_handler.request_access(b_request.to_request()).await.is_some());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!b_waiting_on_a.is_finished());
    assert_eq!(a.deferred_peers().await, vec![2]);

    assert!(a.hold().await);
    let clock_at_release = a.clock().now();
    assert_eq!(a.release().await, vec![2]);

    let grant = b_waiting_on_a.await.unwrap().unwrap();
    assert!(grant.timestamp > clock_at_release);
    assert!(a.deferred_peers().await.is_empty());
}

async fn listen(process: Arc<Process>, shutdown: &CancellationToken) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let handler = InboundHandler::new(process, shutdown.clone());
    tokio::spawn(serve(listener, handler, shutdown.clone()));
    address
}

/// Address of a listener that hangs up on every connection before replying.
async fn hanging_up_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            drop(stream);
        }
    });
    address
}

#[tokio::test]
async fn peer_hanging_up_does_not_block_entry() {
    let shutdown = CancellationToken::new();
    let printer = Arc::new(CountingPrinter::default());

    let z = Arc::new(Process::new(3));
    let z_address = listen(Arc::clone(&z), &shutdown).await;
    let y_address = hanging_up_address().await;

    let x = Coordinator::new(
        Arc::new(Process::new(1)),
        Arc::new(TcpPeerGateway::new(BTreeMap::from([
            (2, y_address),
            (3, z_address),
        ]))),
        printer.clone(),
    );

    let outcome = tokio::time::timeout(
        Duration::from_secs(10),
        x.request_critical_section(&shutdown),
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        Outcome::Completed { ref granted, ref failed, .. } if granted == &[3] && failed == &[2]
    ));
    assert_eq!(printer.jobs.lock().await.len(), 1);
    // Z observed X's request timestamp
    assert!(z.clock().now() > 1);
    shutdown.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn peers_take_turns_over_tcp() {
    let shutdown = CancellationToken::new();
    let printer = Arc::new(CountingPrinter::default());

    let processes = (1..=3)
        .map(|id| Arc::new(Process::new(id)))
        .collect::<Vec<_>>();
    let mut addresses = BTreeMap::new();
    for process in &processes {
        addresses.insert(process.id(), listen(Arc::clone(process), &shutdown).await);
    }

    let mut attempts = JoinSet::new();
    for process in &processes {
        let mut table = addresses.clone();
        table.remove(&process.id());
        let coordinator = Coordinator::new(
            Arc::clone(process),
            Arc::new(TcpPeerGateway::new(table)),
            printer.clone(),
        )
        .with_quorum_timeout(Some(Duration::from_secs(10)));
        let shutdown = shutdown.clone();

        attempts.spawn(async move {
            for _ in 0..3 {
                let outcome = coordinator.request_critical_section(&shutdown).await;
                assert!(
                    matches!(outcome, Outcome::Completed { ref failed, .. } if failed.is_empty()),
                    "unexpected outcome {outcome:?}"
                );
            }
        });
    }

    while let Some(result) = attempts.join_next().await {
        result.unwrap();
    }

    assert_eq!(printer.max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(printer.jobs.lock().await.len(), 9);
    shutdown.cancel();
}

#[tokio::test]
async fn listener_acknowledges_release_and_drops_garbage() {
    use futures::{SinkExt, StreamExt};
    use ricart_agrawala::gateway::framed;

    let shutdown = CancellationToken::new();
    let process = Arc::new(Process::new(1));
    let address = listen(Arc::clone(&process), &shutdown).await;

    let reply: PeerReply = call(
        &address,
        &PeerMessage::Release(AccessRelease {
            client_id: 2,
            timestamp: 30,
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply, PeerReply::Ack);
    assert_eq!(process.clock().now(), 31);

    let mut lines = framed(tokio::net::TcpStream::connect(&address).await.unwrap());
    lines.send("definitely not a peer message").await.unwrap();
    assert!(lines.next().await.is_none());
    assert_eq!(process.state().await, MutexState::Released);

    shutdown.cancel();
}

#[tokio::test]
async fn shutdown_releases_blocked_handler_connections() {
    let shutdown = CancellationToken::new();
    let process = Arc::new(Process::new(1));
    let address = listen(Arc::clone(&process), &shutdown).await;

    process.want().await.unwrap();
    process.hold().await;

    let pending = {
        let address = address.clone();
        tokio::spawn(async move {
            call::<_, PeerReply>(
                &address,
                &PeerMessage::Request(AccessRequest::new(2, 100, 1)),
            )
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(process.deferred_peers().await, vec![2]);

    shutdown.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), pending)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(result, Err(Error::ConnectionClosed)));
}
