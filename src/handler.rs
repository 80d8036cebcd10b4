//! Module that contains the logic applied to every message a peer receives from another peer.

use crate::{
    log,
    message::{AccessRelease, AccessRequest, AccessResponse, PeerMessage, PeerReply},
    state::{Decision, Process},
};
use color_print::cformat;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Struct that answers inbound peer messages on behalf of one process.
#[derive(Clone)]
pub struct InboundHandler {
    process: Arc<Process>,
    shutdown: CancellationToken,
}

impl InboundHandler {
    pub fn new(process: Arc<Process>, shutdown: CancellationToken) -> Self {
        Self { process, shutdown }
    }

    /// Function that handles one message and returns the reply to send back.
    ///
    /// Returns `None` when the handler was abandoned by shutdown; no reply must be sent then.
    pub async fn handle(&self, message: PeerMessage) -> Option<PeerReply> {
        match message {
            PeerMessage::Request(request) => self
                .request_access(request)
                .await
                .map(PeerReply::Grant),
            PeerMessage::Release(release) => {
                self.release_access(release);
                Some(PeerReply::Ack)
            }
        }
    }

    /// Function that grants a peer's request, blocking first if it has to be deferred.
    pub async fn request_access(&self, request: AccessRequest) -> Option<AccessResponse> {
        let id = self.process.id();
        let now = self.process.clock().observe(request.timestamp);

        log::info(&cformat!(
            "<bold>[{id}]</bold> Received REQ from <bold>{}</bold> (their TS: {}, my TS now: {now})",
            request.client_id,
            request.timestamp
        ));

        match self.process.decide(&request).await {
            Decision::Grant => log::info(&cformat!(
                "<bold>[{id}]</bold> Sending immediate <green>GRANT</green> to <bold>{}</bold>",
                request.client_id
            )),
            Decision::Defer { epoch } => {
                log::info(&cformat!(
                    "<bold>[{id}]</bold> <yellow>DEFERRING</yellow> reply to <bold>{}</bold>",
                    request.client_id
                ));

                if !self
                    .process
                    .wait_for_release(request.client_id, epoch, &self.shutdown)
                    .await
                {
                    log::warn(&cformat!(
                        "<bold>[{id}]</bold> Abandoned deferred reply to <bold>{}</bold> on shutdown",
                        request.client_id
                    ));
                    return None;
                }

                log::info(&cformat!(
                    "<bold>[{id}]</bold> Done waiting, sending <green>GRANT</green> to <bold>{}</bold>",
                    request.client_id
                ));
            }
        }

        Some(AccessResponse {
            timestamp: self.process.clock().tick(),
        })
    }

    /// Function that acknowledges a release notice. It only advances the clock.
    pub fn release_access(&self, release: AccessRelease) {
        self.process.clock().observe(release.timestamp);
        log::debug(&cformat!(
            "<bold>[{}]</bold> Received unused release notice from <bold>{}</bold>",
            self.process.id(),
            release.client_id
        ));
    }
}
