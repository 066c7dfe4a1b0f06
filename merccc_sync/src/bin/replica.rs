// CLI entry point for the merccc replica.
//
// Connects to a running synchronization server, mirrors its state, and
// prints every replicated event line to stdout. A config fingerprint
// mismatch is fatal with a non-zero exit.
//
// Usage:
//   merccc-replica [OPTIONS]
//     --server <ADDR>            Server address (default: 127.0.0.1:9977)
//     --config <FILE>            Local scoring config; fingerprint-checked
//     --fetch-config             Adopt the server's config instead
//     --fetch-resources <DIR>    Download the resource bundle into DIR

use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use anyhow::{Context, Result, bail};
use merccc_core::ScoringConfig;
use merccc_protocol::Event;
use merccc_sync::{ConfigSource, Replica};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct Options {
    server: String,
    config: Option<PathBuf>,
    fetch_config: bool,
    fetch_resources: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let options = parse_args();
    let source = if options.fetch_config {
        ConfigSource::FetchRemote
    } else {
        match &options.config {
            Some(path) => ConfigSource::Local(
                ScoringConfig::load(path)
                    .with_context(|| format!("loading scoring config {}", path.display()))?,
            ),
            None => bail!("either --config <FILE> or --fetch-config is required"),
        }
    };

    let replica = Replica::connect(
        &options.server,
        source,
        options.fetch_resources.as_deref(),
    )
    .with_context(|| format!("connecting to {}", options.server))?;
    info!(
        server_version = replica.server_version(),
        "snapshot seeded, mirroring"
    );

    let (tap, events) = mpsc::channel::<Event>();
    thread::spawn(move || {
        for event in events {
            println!("{}", event.to_line());
        }
    });

    replica.run(Some(tap)).context("replication stream ended")
}

/// Parse command-line arguments. Uses simple `std::env::args()` matching,
/// no clap dependency.
fn parse_args() -> Options {
    let mut options = Options {
        server: "127.0.0.1:9977".into(),
        config: None,
        fetch_config: false,
        fetch_resources: None,
    };

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                i += 1;
                options.server = args.get(i).cloned().unwrap_or_else(|| {
                    eprintln!("--server requires an address");
                    std::process::exit(1);
                });
            }
            "--config" => {
                i += 1;
                options.config = Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                    eprintln!("--config requires a value");
                    std::process::exit(1);
                }));
            }
            "--fetch-config" => {
                options.fetch_config = true;
            }
            "--fetch-resources" => {
                i += 1;
                options.fetch_resources =
                    Some(args.get(i).map(PathBuf::from).unwrap_or_else(|| {
                        eprintln!("--fetch-resources requires a directory");
                        std::process::exit(1);
                    }));
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

    options
}

fn print_usage() {
    println!("Usage: merccc-replica [OPTIONS]");
    println!();
    println!("Options:");
    println!("  --server <ADDR>            Server address (default: 127.0.0.1:9977)");
    println!("  --config <FILE>            Local scoring config; fingerprint-checked");
    println!("  --fetch-config             Adopt the server's config instead");
    println!("  --fetch-resources <DIR>    Download the resource bundle into DIR");
    println!("  --help, -h                 Show this help");
}
