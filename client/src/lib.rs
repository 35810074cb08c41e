//! # Canvas Client Library
//!
//! The client half of the shared canvas: a session with the server and a local
//! mirror of its pixel grid.
//!
//! ## Architecture Overview
//!
//! ### Snapshot First
//! Connecting blocks until the server's full snapshot arrives. Until then there
//! is nothing to show and nothing to paint on; if it never arrives the connect
//! fails with a handshake timeout instead of falling back to a made-up canvas.
//!
//! ### Optimistic Local Edits
//! A local edit is applied to the mirror immediately and sent upstream. The
//! server echoes every edit it accepts to every peer, the sender included, so
//! the mirror needs no reconciliation logic: whatever the server applied last
//! is what the mirror ends up showing.
//!
//! ## Module Organization
//!
//! - `mirror`: the local canvas copy
//! - `network`: framed TCP session, handshake, heartbeats, disconnect
//! - `input`: text commands standing in for mouse and keyboard input
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::{Client, ClientEvent};
//! use shared::{PixelEdit, Rgb};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let addr = "127.0.0.1:9999".parse()?;
//!     let mut client = Client::connect(addr, Duration::from_secs(10)).await?;
//!
//!     client.paint(PixelEdit::new(0, 1, Rgb::new(255, 0, 0))).await?;
//!
//!     // The echo of our own edit comes back like any other broadcast
//!     if let ClientEvent::PixelChanged(edit) = client.next_event().await? {
//!         println!("({}, {}) is now {:?}", edit.row, edit.col, edit.color);
//!     }
//!
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod mirror;
pub mod network;
