use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::Parser;
use figment::{
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tallyho_aggregate::DEFAULT_SERIES_LIMIT;

/// Synthetic metrics workload served as a Prometheus scrape endpoint.
#[derive(Parser)]
#[command(name = "bellwether")]
pub struct Cli {
    /// Path to a YAML configuration file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Runtime configuration.
///
/// Values are layered: built-in defaults, then the YAML configuration file (if given), then
/// environment variables prefixed with `BELLWETHER_`.
#[derive(Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Address the scrape endpoint listens on.
    pub listen_addr: SocketAddr,

    /// Maximum number of series held across all instruments.
    pub series_limit: usize,

    /// Seed for the workload's random number generator.
    ///
    /// Runs with the same seed and rate generate the same observations.
    pub seed: u64,

    /// Target number of synthetic observations generated per second.
    pub target_rate: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], 9598).into(),
            series_limit: DEFAULT_SERIES_LIMIT,
            seed: 0xC0FFEE,
            target_rate: 1_000,
        }
    }
}

impl Config {
    /// Loads the configuration from defaults, the given YAML file, and the environment.
    ///
    /// # Errors
    ///
    /// If the configuration file cannot be read, or any provided value fails to deserialize, an
    /// error is returned.
    pub fn load(config_path: Option<&Path>) -> Result<Self, anyhow::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = config_path {
            figment = figment.admerge(Yaml::file_exact(path));
        }

        figment
            .admerge(Env::prefixed("BELLWETHER_"))
            .extract()
            .context("failed to load configuration")
    }
}
