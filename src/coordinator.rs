//! Module that contains the request coordinator, which drives a process into and out of the
//! critical section.

use crate::{
    error::{Error, Result},
    gateway::{PeerGateway, ResourceGateway},
    log,
    message::{AccessRequest, AccessResponse, PrintRequest, PrintResponse},
    state::{Process, RequestDescriptor},
    ProcessId,
};
use color_print::cformat;
use futures::{stream::FuturesUnordered, StreamExt};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

/// Enum that represents how a call to [`Coordinator::request_critical_section`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The critical section was entered and left.
    Completed {
        granted: Vec<ProcessId>,
        /// Peers whose slot was counted as satisfied after a transport failure or timeout.
        failed: Vec<ProcessId>,
        printed: Option<PrintResponse>,
    },
    /// Shutdown interrupted the wait for grants; the critical section was not entered.
    Abandoned,
    /// Another attempt was already in progress.
    Busy,
}

pub struct Coordinator {
    process: Arc<Process>,
    peers: Arc<dyn PeerGateway>,
    resource: Arc<dyn ResourceGateway>,
    quorum_timeout: Option<Duration>,
}

impl Coordinator {
    pub fn new(
        process: Arc<Process>,
        peers: Arc<dyn PeerGateway>,
        resource: Arc<dyn ResourceGateway>,
    ) -> Self {
        Self {
            process,
            peers,
            resource,
            quorum_timeout: None,
        }
    }

    /// Function that bounds the wait for each peer's grant. `None` waits forever.
    pub fn with_quorum_timeout(mut self, quorum_timeout: Option<Duration>) -> Self {
        self.quorum_timeout = quorum_timeout;
        self
    }

    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Function that acquires the printer from every peer, prints one job and releases it.
    pub async fn request_critical_section(&self, shutdown: &CancellationToken) -> Outcome {
        let id = self.process.id();

        let Some(descriptor) = self.process.want().await else {
            log::warn(&cformat!("<bold>[{id}]</bold> A request is already in progress."));
            return Outcome::Busy;
        };

        log::info(&cformat!(
            "<bold>[{id}]</bold> MODE: <yellow, bold>WANTED</yellow, bold> (TS: {}, Req: {})",
            descriptor.timestamp,
            descriptor.sequence_number
        ));

        let (granted, failed) = tokio::select! {
            votes = self.collect_grants(descriptor.to_request()) => votes,
            _ = shutdown.cancelled() => {
                log::warn(&cformat!(
                    "<bold>[{id}]</bold> Interrupted while waiting for grants, abandoning the request."
                ));
                self.process.release().await;
                return Outcome::Abandoned;
            }
        };

        if !self.process.hold().await {
            log::error(&cformat!(
                "<bold>[{id}]</bold> Entering the critical section from a state other than WANTED."
            ));
        }
        log::info(&cformat!(
            "<bold>[{id}]</bold> MODE: <red, bold>HELD</red, bold> (entering the critical section)"
        ));

        let printed = self.access_critical_section(&descriptor).await;

        let woken = self.process.release().await;
        log::info(&cformat!(
            "<bold>[{id}]</bold> MODE: <green, bold>RELEASED</green, bold> (leaving the critical section, {} deferred)",
            woken.len()
        ));

        Outcome::Completed {
            granted,
            failed,
            printed,
        }
    }

    /// Function that sends `request` to every peer at once and waits until all of them resolved.
    ///
    /// Returns the peers that granted and the peers that failed, in completion order.
    async fn collect_grants(&self, request: AccessRequest) -> (Vec<ProcessId>, Vec<ProcessId>) {
        let id = self.process.id();
        let mut granted = Vec::new();
        let mut failed = Vec::new();

        let mut pending = self
            .peers
            .peers()
            .into_iter()
            .map(|peer| async move { (peer, self.ask(peer, request).await) })
            .collect::<FuturesUnordered<_>>();

        while let Some((peer, result)) = pending.next().await {
            match result {
                Ok(response) => {
                    let now = self.process.clock().observe(response.timestamp);
                    log::info(&cformat!(
                        "<bold>[{id}]</bold> Received <green>GRANT</green> from <bold>{peer}</bold> (their TS: {}, my TS now: {now})",
                        response.timestamp
                    ));
                    granted.push(peer);
                }
                Err(e) => {
                    log::error(&cformat!(
                        "<bold>[{id}]</bold> Failed to contact <bold>{peer}</bold>: {e}"
                    ));
                    failed.push(peer);
                }
            }
        }

        (granted, failed)
    }

    async fn ask(&self, peer: ProcessId, request: AccessRequest) -> Result<AccessResponse> {
        log::debug(&cformat!(
            "<bold>[{}]</bold> Sending REQ to <bold>{peer}</bold> (TS: {}, Req: {})",
            self.process.id(),
            request.timestamp,
            request.request_number
        ));

        match self.quorum_timeout {
            Some(limit) => tokio::time::timeout(limit, self.peers.request_access(peer, request))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.peers.request_access(peer, request).await,
        }
    }

    async fn access_critical_section(&self, descriptor: &RequestDescriptor) -> Option<PrintResponse> {
        let id = self.process.id();
        let job = PrintRequest::job(id, self.process.clock().tick(), descriptor.sequence_number);

        log::info(&cformat!(
            "<bold>[{id}]</bold> Sending to the printer (TS: {}, Req: {})...",
            job.timestamp,
            job.request_number
        ));

        match self.resource.print(job).await {
            Ok(response) => {
                response.print();
                Some(response)
            }
            Err(e) => {
                log::error(&cformat!(
                    "<bold>[{id}]</bold> Error while accessing the printer: {e}"
                ));
                None
            }
        }
    }
}
