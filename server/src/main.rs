use clap::Parser;
use env_logger::Env;
use log::info;
use server::config::ServerConfig;
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,

    /// Maximum number of connected peers
    #[arg(short, long, default_value_t = shared::MAX_PEERS)]
    max_peers: usize,

    /// Canvas save file, read at startup and written on shutdown
    #[arg(short, long, default_value = "savedcanvas.dat")]
    save_file: PathBuf,

    /// Canvas width when no save file exists
    #[arg(long, default_value_t = shared::DEFAULT_WIDTH)]
    width: i16,

    /// Canvas height when no save file exists
    #[arg(long, default_value_t = shared::DEFAULT_HEIGHT)]
    height: i16,

    /// Seconds of silence before a peer is dropped
    #[arg(long, default_value = "5")]
    peer_timeout_secs: u64,

    /// How long shutdown waits for peers to acknowledge
    #[arg(long, default_value = "2000")]
    shutdown_grace_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_peers: args.max_peers,
        save_path: Some(args.save_file),
        default_width: args.width,
        default_height: args.height,
        peer_timeout: Duration::from_secs(args.peer_timeout_secs),
        shutdown_grace: Duration::from_millis(args.shutdown_grace_ms),
    };

    let server = Server::start(config).await?;
    server.run().await?;

    info!("Server stopped");
    Ok(())
}
