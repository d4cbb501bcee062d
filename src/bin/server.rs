//! shimhub Server Binary
//!
//! Loads the endpoint registry and runs the hub until it is halted.

use clap::Parser;
use shimhub::{Config, Reactor, Registry};
use tracing_subscriber::{fmt, EnvFilter};

/// shimhub Server
#[derive(Parser, Debug)]
#[command(name = "shimhub-server")]
#[command(about = "Message relay hub for shimming endpoints")]
#[command(version)]
struct Args {
    /// Endpoint registry (TOML)
    #[arg(short, long, default_value = "./network_description.toml")]
    registry: String,

    /// Registry name of the hub
    #[arg(short, long, default_value = "server")]
    name: String,

    /// Listen address (host:port), used when the registry has no entry for the hub
    #[arg(short, long, default_value = "127.0.0.1:5000")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "64")]
    max_connections: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shimhub=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let args = Args::parse();

    tracing::info!("shimhub Server v{}", shimhub::VERSION);
    tracing::info!("Registry: {}", args.registry);

    // Build config from args
    let config = Config::builder()
        .hub_name(&args.name)
        .registry_path(&args.registry)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .build();

    let registry = match Registry::load(&config.registry_path) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to load registry: {}", e);
            std::process::exit(1);
        }
    };

    for (name, endpoint) in registry.endpoints() {
        tracing::debug!("Registered endpoint {} at {}", name, endpoint.addr);
    }

    let mut reactor = match Reactor::bind(&config, registry) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Failed to start hub: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = reactor.run() {
        tracing::error!("Hub error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Hub stopped");
}
