use crate::{
    error::Result,
    gateway::{framed, incoming, next_connection},
    log,
    message::{JsonLine, PrintRequest, PrintResponse},
};
use color_print::cformat;
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::{net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

/// Struct that represents the shared printer. It keeps no state between jobs.
#[derive(Debug, Clone)]
pub struct Server {
    pub own_address: String,
    /// Bounds, in milliseconds, of how long a single job takes to print.
    pub delay_range: (u64, u64),
}

impl Server {
    pub fn new(own_address: String, delay_range: (u64, u64)) -> Self {
        Self {
            own_address,
            delay_range,
        }
    }

    async fn handle(stream: TcpStream, address: SocketAddr, delay_range: (u64, u64)) -> Result<()> {
        let mut lines = framed(stream);

        while let Some(line) = lines.next().await {
            let line = line?;

            let response = match PrintRequest::from_json_string(&line) {
                Ok(request) => {
                    request.print();
                    tokio::time::sleep(print_delay(delay_range)).await;
                    log::info(&cformat!(
                        "PRINT DONE. Answering client <bold>{}</bold>.",
                        request.client_id
                    ));
                    request.to_response()
                }
                Err(e) => {
                    log::warn(&format!("Malformed print request from {address}: {e}"));
                    PrintResponse::malformed()
                }
            };

            lines.send(response.to_json_string()?).await?;
        }

        Ok(())
    }

    /// Function that binds the configured address and serves until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(&self.own_address).await?;

        log::info(&cformat!(
            "--- Printer server started on <bold>{}</bold> ---",
            self.own_address
        ));
        log::info("Waiting for print requests...");

        self.serve(listener, shutdown).await;
        Ok(())
    }

    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) {
        let mut incoming = std::pin::pin!(incoming(listener));

        while let Some((stream, address)) = next_connection(&mut incoming, &shutdown).await {
            log::debug(&cformat!("Accepted a <bold>connection</bold> from {address}."));

            let delay_range = self.delay_range;
            tokio::spawn(async move {
                if let Err(e) = Self::handle(stream, address, delay_range).await {
                    log::error(&format!("{e}"));
                };
            });
        }
    }
}

fn print_delay((low, high): (u64, u64)) -> Duration {
    Duration::from_millis(rand::rng().random_range(low..=high.max(low)))
}
