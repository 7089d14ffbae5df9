//! # meshcoex
//!
//! Command-line runner: loads a scenario (TOML file or built-in default),
//! applies flag overrides, runs it to completion and prints the report.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use meshcoex::{CoexResult, Scenario, ScenarioConfig};

/// Mesh / WLAN coexistence simulator.
#[derive(Parser, Debug)]
#[command(name = "meshcoex")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scenario file (TOML). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master random seed.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of mesh devices, coordinator included.
    #[arg(short = 'n', long)]
    mesh_devices: Option<usize>,

    /// Simulated duration in seconds.
    #[arg(short = 't', long)]
    simulation_time: Option<f64>,

    /// Heartbeat payload size in bytes (at least 16).
    #[arg(long)]
    payload_size: Option<usize>,

    /// Print the report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn scenario_config(&self) -> CoexResult<ScenarioConfig> {
        let mut config = match &self.config {
            Some(path) => ScenarioConfig::load(path)?,
            None => ScenarioConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(n) = self.mesh_devices {
            config.mesh_devices = n;
        }
        if let Some(t) = self.simulation_time {
            config.simulation_time = t;
        }
        if let Some(size) = self.payload_size {
            config.heartbeat.payload_size = size;
        }
        Ok(config)
    }
}

fn run(cli: &Cli) -> CoexResult<()> {
    let config = cli.scenario_config()?;
    let report = Scenario::from_config(&config)?.run()?;
    if cli.json {
        println!("{}", report.to_json()?);
    } else {
        println!("{}", report);
    }
    Ok(())
}

fn main() -> ExitCode {
    // RUST_LOG wins; otherwise progress at info goes to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
