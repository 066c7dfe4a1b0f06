// CLI entry point for the merccc synchronization server.
//
// Loads and validates the scoring config and team roster (both failures are
// fatal before any socket opens), then serves until the process is killed.
//
// Usage:
//   merccc-server --config <FILE> --teams <FILE> [OPTIONS]
//     --config <FILE>       Scoring configuration JSON (required)
//     --teams <FILE>        Team roster JSON (required)
//     --port <PORT>         Public listener port (default: 9977)
//     --local-port <PORT>   Privileged loopback listener port (default: 9978)
//     --resources <DIR>     Resource bundle root served to replicas
//     --data <FILE>         Persisted DATA rows re-read by import-data

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use merccc_core::{ScoringConfig, load_roster};
use merccc_sync::{ServerConfig, SyncContext, start_server};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Options {
    config: PathBuf,
    teams: PathBuf,
    port: u16,
    local_port: u16,
    resources: Option<PathBuf>,
    data: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args();
    let config = ScoringConfig::load(&options.config)
        .with_context(|| format!("loading scoring config {}", options.config.display()))?;
    let roster = load_roster(&options.teams)
        .with_context(|| format!("loading team roster {}", options.teams.display()))?;
    info!(
        teams = roster.len(),
        fingerprint = config.fingerprint(),
        "competition loaded"
    );

    let ctx = Arc::new(SyncContext::new(
        config,
        roster,
        options.resources,
        options.data,
    ));
    let server_config = ServerConfig {
        port: options.port,
        local_port: options.local_port,
    };
    let (_handle, public, local) =
        start_server(server_config, ctx).context("starting the synchronization server")?;
    info!(%public, %local, "serving; kill the process to stop");

    // Run until killed; connection and timer threads do the work.
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
    }
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching,
/// no clap dependency.
fn parse_args() -> Options {
    let defaults = ServerConfig::default();
    let mut config: Option<PathBuf> = None;
    let mut teams: Option<PathBuf> = None;
    let mut port = defaults.port;
    let mut local_port = defaults.local_port;
    let mut resources: Option<PathBuf> = None;
    let mut data: Option<PathBuf> = None;

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                config = Some(required_path(&args, i, "--config"));
            }
            "--teams" => {
                i += 1;
                teams = Some(required_path(&args, i, "--teams"));
            }
            "--port" => {
                i += 1;
                port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--local-port" => {
                i += 1;
                local_port = args.get(i).and_then(|s| s.parse().ok()).unwrap_or_else(|| {
                    eprintln!("--local-port requires a valid port number");
                    std::process::exit(1);
                });
            }
            "--resources" => {
                i += 1;
                resources = Some(required_path(&args, i, "--resources"));
            }
            "--data" => {
                i += 1;
                data = Some(required_path(&args, i, "--data"));
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                print_usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let config = config.unwrap_or_else(|| {
        eprintln!("--config is required");
        print_usage();
        std::process::exit(1);
    });
    let teams = teams.unwrap_or_else(|| {
        eprintln!("--teams is required");
        print_usage();
        std::process::exit(1);
    });
    Options {
        config,
        teams,
        port,
        local_port,
        resources,
        data,
    }
}

fn required_path(args: &[String], i: usize, flag: &str) -> PathBuf {
    args.get(i).map(PathBuf::from).unwrap_or_else(|| {
        eprintln!("{flag} requires a value");
        std::process::exit(1);
    })
}

fn print_usage() {
    println!("Usage: merccc-server --config <FILE> --teams <FILE> [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --config <FILE>       Scoring configuration JSON (required)");
    println!("  --teams <FILE>        Team roster JSON (required)");
    println!("  --port <PORT>         Public listener port (default: 9977)");
    println!("  --local-port <PORT>   Privileged loopback listener port (default: 9978)");
    println!("  --resources <DIR>     Resource bundle root served to replicas");
    println!("  --data <FILE>         Persisted DATA rows re-read by import-data");
    println!("  --help, -h            Show this help");
}
