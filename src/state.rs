//! Module that contains the per-process mutual exclusion state and the monitor guarding it.
//!
//! A [`Process`] is the single aggregate shared by the request coordinator and every inbound
//! handler of one process. The state machine, the pending request and the deferred set live
//! behind one mutex; a [`Notify`] is signalled on every release so that blocked handlers can
//! re-check whether their peer was let go.

use crate::{
    clock::LamportClock, deferred::DeferredSet, message::AccessRequest, LogicalTimestamp,
    ProcessId,
};
use std::fmt;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

/// Enum that represents where a process stands with respect to the critical section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Released,
    Wanted,
    Held,
}

impl fmt::Display for MutexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => write!(f, "RELEASED"),
            Self::Wanted => write!(f, "WANTED"),
            Self::Held => write!(f, "HELD"),
        }
    }
}

/// Struct that represents the request a process is currently trying to get granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub owner_id: ProcessId,
    pub timestamp: LogicalTimestamp,
    pub sequence_number: u64,
}

impl RequestDescriptor {
    /// Function that tells if this request must be served before `other`.
    ///
    /// Requests are ordered by timestamp, then by sequence number, then by owner id. The owner
    /// id only matters when two processes stamp the same timestamp and sequence number, which
    /// would otherwise leave both without priority.
    pub fn has_priority_over(&self, other: &AccessRequest) -> bool {
        (self.timestamp, self.sequence_number, self.owner_id)
            < (other.timestamp, other.request_number, other.client_id)
    }

    pub fn to_request(&self) -> AccessRequest {
        AccessRequest::new(self.owner_id, self.timestamp, self.sequence_number)
    }
}

/// Function that applies the deferral rule to an incoming request.
///
/// A request is deferred while the resource is held, or while it is wanted by an earlier request.
pub fn must_defer(
    state: MutexState,
    ours: Option<&RequestDescriptor>,
    theirs: &AccessRequest,
) -> bool {
    let we_have_priority = state == MutexState::Wanted
        && ours.is_some_and(|ours| ours.has_priority_over(theirs));

    state == MutexState::Held || we_have_priority
}

/// Enum that represents what an inbound handler must do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Grant,
    /// The peer was registered as deferred during release epoch `epoch`.
    Defer { epoch: u64 },
}

#[derive(Debug)]
struct Shared {
    state: MutexState,
    descriptor: Option<RequestDescriptor>,
    deferred: DeferredSet,
    sequence: u64,
    releases: u64,
}

impl Shared {
    fn is_let_go(&self, peer: ProcessId, epoch: u64) -> bool {
        !self.deferred.contains(peer) || self.releases != epoch
    }
}

/// Struct that represents the coordination state owned by one process.
#[derive(Debug)]
pub struct Process {
    id: ProcessId,
    clock: LamportClock,
    shared: Mutex<Shared>,
    released: Notify,
}

impl Process {
    pub fn new(id: ProcessId) -> Self {
        Self {
            id,
            clock: LamportClock::new(),
            shared: Mutex::new(Shared {
                state: MutexState::Released,
                descriptor: None,
                deferred: DeferredSet::new(),
                sequence: 0,
                releases: 0,
            }),
            released: Notify::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    pub async fn state(&self) -> MutexState {
        self.shared.lock().await.state
    }

    pub async fn descriptor(&self) -> Option<RequestDescriptor> {
        self.shared.lock().await.descriptor
    }

    /// Function that returns the peers currently deferred, in ascending id order.
    pub async fn deferred_peers(&self) -> Vec<ProcessId> {
        self.shared.lock().await.deferred.to_vec()
    }

    /// Function that moves the process from RELEASED to WANTED and stamps a new request.
    ///
    /// Returns `None` if an attempt is already in progress.
    pub async fn want(&self) -> Option<RequestDescriptor> {
        let mut shared = self.shared.lock().await;
        if shared.state != MutexState::Released {
            return None;
        }

        shared.sequence += 1;
        let descriptor = RequestDescriptor {
            owner_id: self.id,
            timestamp: self.clock.tick(),
            sequence_number: shared.sequence,
        };
        shared.state = MutexState::Wanted;
        shared.descriptor = Some(descriptor);

        Some(descriptor)
    }

    /// Function that moves the process from WANTED to HELD. Returns `false` if it was not WANTED.
    pub async fn hold(&self) -> bool {
        let mut shared = self.shared.lock().await;
        if shared.state != MutexState::Wanted {
            return false;
        }
        shared.state = MutexState::Held;
        true
    }

    /// Function that moves the process back to RELEASED and lets every deferred peer go.
    ///
    /// Returns the peers that were deferred at the time of the release.
    pub async fn release(&self) -> Vec<ProcessId> {
        let released = {
            let mut shared = self.shared.lock().await;
            shared.state = MutexState::Released;
            shared.descriptor = None;
            shared.releases += 1;
            shared.deferred.drain()
        };

        self.released.notify_waiters();
        released
    }

    /// Function that decides, under the state mutex, whether `request` is granted now or deferred.
    pub async fn decide(&self, request: &AccessRequest) -> Decision {
        let mut shared = self.shared.lock().await;

        if must_defer(shared.state, shared.descriptor.as_ref(), request) {
            shared.deferred.insert(request.client_id);
            Decision::Defer {
                epoch: shared.releases,
            }
        } else {
            Decision::Grant
        }
    }

    /// Function that blocks until `peer`, deferred during `epoch`, is let go by a release.
    ///
    /// Returns `false` if `shutdown` fired first.
    pub async fn wait_for_release(
        &self,
        peer: ProcessId,
        epoch: u64,
        shutdown: &CancellationToken,
    ) -> bool {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // register before testing the predicate so a release in between is not missed
            notified.as_mut().enable();

            if self.shared.lock().await.is_let_go(peer, epoch) {
                return true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }
}
