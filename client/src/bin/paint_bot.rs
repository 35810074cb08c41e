//! Connects to a canvas server and paints random pixels at a fixed pace.

use clap::Parser;
use client::network::{Client, ClientEvent, HEARTBEAT_INTERVAL};
use env_logger::Env;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{PixelEdit, Rgb};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::{interval, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9999")]
    server: SocketAddr,

    /// Number of pixels to paint
    #[arg(short = 'n', long, default_value = "100")]
    count: u32,

    /// Delay between edits in milliseconds
    #[arg(short = 'i', long, default_value = "50")]
    interval_ms: u64,

    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut client = Client::connect(args.server, Duration::from_secs(10)).await?;
    let (width, height) = (client.canvas().width(), client.canvas().height());
    if width == 0 || height == 0 {
        warn!("Canvas is empty, nothing to paint");
        client.disconnect().await;
        return Ok(());
    }

    let mut paint_tick = interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);
    let started = Instant::now();
    let mut painted = 0u32;
    let mut received = 0u32;

    while painted < args.count {
        tokio::select! {
            _ = paint_tick.tick() => {
                let edit = PixelEdit::new(
                    rng.gen_range(0..height),
                    rng.gen_range(0..width),
                    Rgb::new(rng.gen(), rng.gen(), rng.gen()),
                );
                client.paint(edit).await?;
                painted += 1;
            },

            event = client.next_event() => {
                match event? {
                    ClientEvent::PixelChanged(_) => received += 1,
                    ClientEvent::Resynced => {}
                    ClientEvent::ServerClosed => {
                        warn!("Server closed after {} edits", painted);
                        return Ok(());
                    }
                }
            },

            _ = heartbeat.tick() => {
                client.heartbeat().await?;
            },
        }
    }

    info!(
        "Painted {} pixels in {:.1}s, received {} broadcasts",
        painted,
        started.elapsed().as_secs_f32(),
        received
    );

    client.disconnect().await;
    Ok(())
}
