//! Embercast chat server
//!
//! Live chat core for a self-hosted streaming platform: stream-keyed rooms,
//! moderation, slow mode and typed event fan-out over QUIC.
//!
//! Usage:
//!   cargo run -- server                    # Run the chat server
//!   cargo run -- server --port 4433        # Run on a specific port

use std::env;
use std::sync::Arc;

use embercast::server::endpoint;
use embercast::{ChatServer, ServerConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "server" => {
            run_server(&args).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("Embercast - Live-Stream Chat Server");
    println!();
    println!("USAGE:");
    println!("    cargo run -- server [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    server              Start the chat server");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --port <PORT>       Port to listen on (default: 4433)");
    println!("    --max-conn <NUM>    Maximum connections (default: 10000)");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- server");
    println!("    cargo run -- server --port 5000");
    println!("    RUST_LOG=debug cargo run -- server");
}

fn parse_flag<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    for i in 0..args.len() {
        if args[i] == flag && i + 1 < args.len() {
            if let Ok(value) = args[i + 1].parse() {
                return value;
            }
        }
    }
    default
}

async fn run_server(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let port: u16 = parse_flag(args, "--port", 4433);
    let max_connections: usize = parse_flag(args, "--max-conn", 10000);

    let config = ServerConfig {
        bind_addr: format!("0.0.0.0:{}", port).parse()?,
        max_connections,
        ..Default::default()
    };

    info!("Starting chat server");
    info!("  - Bind address: {}", config.bind_addr);
    info!("  - Max connections: {}", config.max_connections);
    info!("  - History cap: {}", config.engine.history_cap);
    info!(
        "  - Room eviction grace: {:?}",
        config.engine.eviction_grace
    );

    let server = Arc::new(ChatServer::new(config));

    if let Err(e) = endpoint::serve(server).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
