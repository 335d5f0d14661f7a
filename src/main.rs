//! stashkv-daemon - the cache daemon
//!
//! Opens the durable store, binds the Unix socket and serves cache
//! requests until SIGINT or SIGTERM. Normally started in the background by
//! a consumer's bootstrap rather than by hand.

use anyhow::Context;
use stashkv::config::Config;
use stashkv::logging;
use stashkv::server::CacheServer;
use stashkv::storage::Store;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{error, info};

/// Applies command-line overrides on top of the environment.
fn apply_args(config: &mut Config) {
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    config.socket_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: --socket requires a value");
                    std::process::exit(1);
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.db_path = PathBuf::from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("Error: --db requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-v" => {
                println!("stashkv-daemon version {}", stashkv::VERSION);
                std::process::exit(0);
            }
            _ => {
                eprintln!("Unknown argument: {}", args[i]);
                print_help();
                std::process::exit(1);
            }
        }
    }
}

fn print_help() {
    println!(
        r#"
stashkv-daemon - persistent TTL-aware key-value cache daemon

USAGE:
    stashkv-daemon [OPTIONS]

OPTIONS:
    -s, --socket <PATH>  Unix socket to listen on (env: STASHKV_SOCK)
    -d, --db <PATH>      Durable cache file (env: STASHKV_DB)
    -v, --version        Print version information
    -h, --help           Print this help message

ENVIRONMENT:
    STASHKV_BUCKET            Bucket name (default: cache)
    STASHKV_DEFAULT_TTL       Default TTL in seconds, 0 = never (default: 900)
    STASHKV_MAX_CONNECTIONS   Concurrent connection limit (default: 1024)
    STASHKV_LOG               Append logs to this file instead of stderr
    RUST_LOG                  Log filter (default: info)

The daemon is usually started on demand by `stashkv` or any other
consumer that cannot reach the socket.
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = Config::from_env().context("invalid configuration")?;
    apply_args(&mut config);

    logging::init(config.log_file.as_deref()).context("failed to open log file")?;

    info!(
        version = stashkv::VERSION,
        socket = %config.socket_path.display(),
        db = %config.db_path.display(),
        "Starting stashkv daemon"
    );

    // The store lock decides which daemon owns the socket, so open it first
    let store = Store::open(&config.db_path, config.bucket.clone(), config.default_ttl)
        .with_context(|| format!("failed to open cache store {}", config.db_path.display()))?;
    let store = Arc::new(store);

    let server = match CacheServer::bind(
        &config.socket_path,
        Arc::clone(&store),
        config.max_connections,
    ) {
        Ok(server) => server,
        Err(e) => {
            store.close();
            return Err(e).context("failed to set up socket");
        }
    };

    server.run_until(shutdown_signal()).await;

    store.close();
    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
