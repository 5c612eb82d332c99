//! Demo daemon that aggregates a synthetic request workload and serves it as a Prometheus scrape
//! endpoint.

#![deny(warnings)]
#![deny(missing_docs)]

use anyhow::Context as _;
use clap::Parser as _;
use tallyho_aggregate::Registry;
use tallyho_expose::ScrapeServer;
use tracing::{error, info};
use tracing_subscriber::{filter::LevelFilter, EnvFilter};

mod config;
use self::config::{Cli, Config};

mod workload;
use self::workload::Workload;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run().await {
        Ok(()) => info!("bellwether stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<(), anyhow::Error> {
    info!("bellwether starting...");

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let registry = Registry::with_series_limit(config.series_limit);
    let workload = Workload::register(&registry, config.seed, config.target_rate)?;

    let server = ScrapeServer::bind(config.listen_addr, registry)
        .await
        .context("failed to start scrape server")?;

    info!("Serving scrape endpoint on {}.", server.local_addr());

    let (http_shutdown, mut http_error) = server.listen();
    let generator = tokio::spawn(workload.run());

    info!("Workload running, waiting for interrupt...");

    // Wait for the shutdown signal or a server failure before exiting.
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received. Exiting...");
        },
        error = &mut http_error => {
            if let Some(error) = error {
                error!(%error, "Scrape server failed. Exiting...");
            }
        },
    }

    generator.abort();
    http_shutdown.shutdown();

    Ok(())
}
