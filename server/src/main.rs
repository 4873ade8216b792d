use clap::Parser;
use server::network::{Server, ServerConfig};
use std::time::Duration;

/// Session coordinator for the location-guessing party game.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value = "8080")]
    port: u16,
    /// Round length in seconds, from start to deadline
    #[clap(short, long, default_value = "300")]
    round_secs: u64,
    /// Maximum concurrent connections
    #[clap(short, long, default_value = "64")]
    max_connections: usize,
    /// Seconds of silence before a connection is dropped
    #[clap(short = 't', long, default_value = "30")]
    connection_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let config = ServerConfig {
        round_duration: Duration::from_secs(args.round_secs),
        max_connections: args.max_connections,
        connection_timeout: Duration::from_secs(args.connection_timeout_secs),
    };

    let addr = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&addr, config).await?;

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    }
}
