use clap::Parser;
use server_monitor::{
    agent::{ConnectionManager, SystemSnapshotSource, WebSocketTransport},
    config::read_agent_config,
    logging,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_agent_config(&args.file)?;
    let manager = ConnectionManager::new(WebSocketTransport, SystemSnapshotSource::new(), config)?;

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, stopping");
        }
        shutdown.cancel();
    });

    manager.run(cancel).await;

    Ok(())
}
