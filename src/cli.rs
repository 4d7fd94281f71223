//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the application using the
//! `clap` crate. These arguments are parsed at startup and then merged with
//! the configuration from the `alertd.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// Polls the alert backlog and delivers alerts, coordinating with peer
/// processes through distributed locks.
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level (e.g. "info", "debug", "alertd=trace").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Upper bound of the random pause between polls, in seconds.
    #[arg(long, value_name = "SECONDS")]
    pub max_jitter: Option<u64>,

    /// Serve Prometheus metrics.
    #[arg(long)]
    pub metrics: bool,

    /// JSON file of alerts to load into the backlog at startup.
    #[arg(long, value_name = "FILE")]
    pub seed: Option<PathBuf>,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        let mut dispatch = Dict::new();
        if let Some(jitter) = self.max_jitter {
            dispatch.insert("max_jitter_seconds".into(), Value::from(jitter));
        }
        if !dispatch.is_empty() {
            dict.insert("dispatch".into(), Value::from(dispatch));
        }

        // Only an explicit `--metrics` overrides the file; absence leaves it as configured.
        if self.metrics {
            let mut metrics = Dict::new();
            metrics.insert("enabled".into(), Value::from(true));
            dict.insert("metrics".into(), Value::from(metrics));
        }

        if let Some(seed) = &self.seed {
            let mut repository = Dict::new();
            repository.insert(
                "seed_file".into(),
                Value::from(seed.to_string_lossy().into_owned()),
            );
            dict.insert("repository".into(), Value::from(repository));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
