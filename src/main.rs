use clap::Parser;
use ricart_agrawala::{
    config::{Cli, Command},
    error::Result,
    log,
    peer::Peer,
    server::Server,
};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    log::set_verbose(cli.verbose);

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info("Shutting down...");
            }
            shutdown.cancel();
        });
    }

    match run(cli.command, shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error(&format!("{e}"));
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, shutdown: CancellationToken) -> Result<()> {
    match command {
        Command::Peer(args) => Peer::from_args(&args)?.run(shutdown).await,
        Command::Printer(args) => {
            Server::new(args.listen_address(), args.delay_range())
                .run(shutdown)
                .await
        }
    }
}
