//! shimhub CLI Client
//!
//! Command-line endpoint for talking to a shimhub hub: one-shot commands
//! and relays, an interactive console, and a shim listener that applies
//! relayed `!shim` commands.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use shimhub::endpoint::{
    is_disconnect_notice, EndpointClient, Exchange, FileShimDriver, ShimController, ShimEvent,
};
use shimhub::protocol::{is_local, Message};
use shimhub::{Config, HubError, Registry, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// shimhub CLI
#[derive(Parser, Debug)]
#[command(name = "shimhub-cli")]
#[command(about = "Endpoint client for the shimhub relay hub")]
struct Args {
    /// Endpoint registry (TOML)
    #[arg(short, long, default_value = "./network_description.toml")]
    registry: String,

    /// This endpoint's registry name
    #[arg(short, long, default_value = "console")]
    name: String,

    /// Registry name of the hub
    #[arg(long, default_value = "server")]
    hub: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a command to the hub or to another endpoint
    Command {
        /// Target endpoint (the hub's name for hub commands)
        to: String,

        /// Command text, e.g. "list"
        text: String,
    },

    /// Relay text to another endpoint
    Relay {
        /// Target endpoint
        to: String,

        /// Text to forward, e.g. "!shim 100 200"
        text: String,
    },

    /// Act as the shim endpoint: apply relayed shim commands
    Listen {
        /// File the shim currents are written to
        #[arg(long, default_value = "shims.txt")]
        shim_file: PathBuf,

        /// Number of shim channels
        #[arg(long, default_value = "24")]
        channels: usize,
    },

    /// Interactive prompt
    Console,
}

fn main() {
    let args = Args::parse();

    let registry = match Registry::load(&args.registry) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load registry: {}", e);
            std::process::exit(1);
        }
    };

    // Registry debug flag raises this endpoint's log level
    let debug = registry.endpoint(&args.name).map_or(false, |ep| ep.debug);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug { "debug" } else { "warn" })
    });
    fmt().with_env_filter(filter).with_target(true).init();

    let config = Config::builder()
        .hub_name(&args.hub)
        .registry_path(&args.registry)
        .build();

    if let Err(e) = run(&args, &config, &registry) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// How long to wait for an answer (or an error) after sending to a peer
const SETTLE: Duration = Duration::from_millis(250);

fn run(args: &Args, config: &Config, registry: &Registry) -> Result<()> {
    let mut client = EndpointClient::connect(&args.name, &config.hub_name, registry)?;

    match &args.command {
        Commands::Command { to, text } => {
            if to == &config.hub_name {
                let exchange = client.call(&config.hub_name, text)?;
                show_exchange(&exchange);
            } else {
                let request = client.command(to, text)?;
                client.send(&request)?;
                show_all(&client.drain(SETTLE)?);
            }
        }
        Commands::Relay { to, text } => {
            let request = client.relay(to, text)?;
            client.send(&request)?;
            show_all(&client.drain(SETTLE)?);
        }
        Commands::Listen { shim_file, channels } => {
            let driver = FileShimDriver::create(shim_file)?;
            listen(&mut client, ShimController::new(driver, *channels))?;
        }
        Commands::Console => console(&mut client, &config.hub_name)?,
    }
    Ok(())
}

/// Apply incoming `!` commands until the hub goes away
fn listen(client: &mut EndpointClient, mut shims: ShimController<FileShimDriver>) -> Result<()> {
    println!("{} waiting for shim commands", client.name());
    loop {
        let message = match client.recv() {
            Ok(message) => message,
            Err(HubError::PeerClosed(_)) => break,
            Err(e) => return Err(e),
        };

        let text = display(&message);
        match shims.handle_text(&text) {
            Ok(ShimEvent::Applied(currents)) => println!("Applied {} channel(s)", currents.len()),
            Ok(ShimEvent::Enabled) => println!("Shimming has been started."),
            Ok(ShimEvent::Disabled) => println!("Shimming has been stopped."),
            Ok(ShimEvent::Disconnect) => break,
            Ok(ShimEvent::Result(text)) => println!("{}", text),
            Err(e) => println!("{}", e),
        }
    }
    shims.into_driver()?;
    println!("Hub disconnected. Goodbye");
    Ok(())
}

/// Read lines from stdin.
///
/// - `!...`          handled here, never sent
/// - `@name text`    relayed to `name`
/// - anything else   hub command
///
/// Anything the hub pushed in the meantime is printed before the next
/// prompt, so replies always line up with the line that caused them.
fn console(client: &mut EndpointClient, hub_name: &str) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        match client.drain(Duration::from_millis(20)) {
            Ok(pending) => {
                if show_all(&pending) {
                    break;
                }
            }
            Err(HubError::PeerClosed(_)) => break,
            Err(e) => return Err(e),
        }

        print!("[shimmer]: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if is_local(line) {
            match line.trim_start_matches('!') {
                "quit" => break,
                "help" => println!("<command> | @<endpoint> <text> | !quit"),
                other => println!("invalid action '{}'", other),
            }
            continue;
        }

        if let Some(rest) = line.strip_prefix('@') {
            let (to, text) = rest.split_once(' ').unwrap_or((rest, ""));
            let relay = client.relay(to, text)?;
            client.send(&relay)?;
            if show_all(&client.drain(SETTLE)?) {
                break;
            }
            continue;
        }

        let exchange = client.call(hub_name, line)?;
        if show_exchange(&exchange) || matches!(line, "halt" | "disconnect") {
            break;
        }
    }
    println!("Hub disconnected. Goodbye");
    Ok(())
}

/// Print a command's exchange; true once the hub has announced shutdown
fn show_exchange(exchange: &Exchange) -> bool {
    let notified = show_all(&exchange.unsolicited);
    match &exchange.reply {
        Some(reply) => {
            println!("{}", display(reply));
            notified
        }
        None => true,
    }
}

/// Print pushed messages; true if one was the disconnect notice
fn show_all(messages: &[Message]) -> bool {
    let mut notified = false;
    for message in messages {
        match message.from() {
            Some(from) => println!("<{}> {}", from, display(message)),
            None => println!("{}", display(message)),
        }
        notified |= is_disconnect_notice(message);
    }
    notified
}

/// Human-readable content of a message
fn display(message: &Message) -> String {
    match message.text() {
        Some(text) => text.to_string(),
        None => match message.json_body() {
            Some(value) => value.to_string(),
            None => String::from_utf8_lossy(message.payload()).into_owned(),
        },
    }
}
