use std::sync::Arc;

use clap::Parser;
use server_monitor::{
    config::{HubConfig, read_hub_config},
    hub::{Pipeline, spawn_hub_server},
    logging,
    notifications::background_queue,
    storage::{MemoryMetricsRepository, MetricsRepository, PostgresMetricsRepository},
};
use tracing::{info, trace, warn};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file; defaults plus HUB_ADDR / HUB_PORT when omitted
    #[arg(short)]
    file: Option<String>,

    /// Drop the metrics database before starting
    #[arg(long)]
    reset_database: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let (log_writer, log_reader) = background_queue();
    logging::init_with_log_queue(log_writer);

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_hub_config(file)?,
        None => HubConfig::default(),
    };

    let repository = open_repository(&config, args.reset_database).await?;

    let pipeline = Pipeline::start(&config, repository, Some(log_reader));
    let (addr, server) = spawn_hub_server(
        config.bind_addr,
        pipeline.state(),
        pipeline.cancellation_token(),
    )
    .await?;
    info!("hub is ready on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c, stopping");

    pipeline.shutdown().await;
    server.await?;

    Ok(())
}

async fn open_repository(
    config: &HubConfig,
    reset_database: bool,
) -> anyhow::Result<Arc<dyn MetricsRepository>> {
    let Some(database) = &config.database else {
        if reset_database {
            warn!("no database configured, nothing to reset");
        }
        info!("no database configured, keeping metrics in memory");
        return Ok(Arc::new(MemoryMetricsRepository::new()));
    };

    let repository = PostgresMetricsRepository::new(database.clone());
    if reset_database {
        repository.reset().await?;
    }
    repository.initialize().await?;

    Ok(Arc::new(repository))
}
