use clap::Parser;
use client::input::{color_to_hex, parse_command, Command};
use client::network::{Client, ClientEvent, HEARTBEAT_INTERVAL};
use env_logger::Env;
use log::{error, info};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:9999")]
    server: SocketAddr,

    /// How long to wait for the initial canvas
    #[arg(short = 't', long, default_value = "10000")]
    handshake_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let timeout = Duration::from_millis(args.handshake_timeout_ms);

    let client = match Client::connect(args.server, timeout).await {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Connection to {} failed: {}", args.server, e);
            return ExitCode::FAILURE;
        }
    };

    println!(
        "Connected to {}, canvas is {}x{}",
        client.server_addr(),
        client.canvas().width(),
        client.canvas().height()
    );
    println!("Commands:");
    println!("  set <row> <col> <r> <g> <b> | set <row> <col> #RRGGBB");
    println!("  get <row> <col> | size | quit");

    match run(client).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(mut client: Client) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut heartbeat = interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }

                match parse_command(&line) {
                    Ok(Command::Set(edit)) => {
                        if let Err(e) = client.paint(edit).await {
                            println!("{}", e);
                        }
                    }
                    Ok(Command::Get { row, col }) => match client.canvas().get_pixel(row, col) {
                        Ok(color) => println!("({}, {}) = {}", row, col, color_to_hex(color)),
                        Err(e) => println!("{}", e),
                    },
                    Ok(Command::Size) => {
                        println!("{}x{}", client.canvas().width(), client.canvas().height());
                    }
                    Ok(Command::Quit) => break,
                    Err(e) => println!("{}", e),
                }
            },

            event = client.next_event() => {
                match event? {
                    ClientEvent::PixelChanged(edit) => {
                        println!("({}, {}) <- {}", edit.row, edit.col, color_to_hex(edit.color));
                    }
                    ClientEvent::Resynced => println!("Canvas resynchronized"),
                    ClientEvent::ServerClosed => {
                        println!("Server closed the connection");
                        return Ok(());
                    }
                }
            },

            _ = heartbeat.tick() => {
                client.heartbeat().await?;
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            },
        }
    }

    client.disconnect().await;
    Ok(())
}
