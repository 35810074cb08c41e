//! # Canvas Server Library
//!
//! The authoritative half of the shared canvas. The server holds the one true
//! copy of the pixel grid, hands a full snapshot to every newcomer and fans
//! each accepted pixel edit out to all connected peers so their mirrors
//! converge.
//!
//! ## Architecture
//!
//! ### Single-Writer Event Loop
//! Each TCP connection gets a reader task that splits the byte stream into
//! frames and queues them. One loop drains that queue and feeds each frame to
//! the [`engine::SyncEngine`], which owns both the canvas and the peer
//! registry. Nothing else touches them, so a delta's bounds check and its
//! application are atomic with respect to every other delta, and the order in
//! which the loop applies deltas is the order every peer observes.
//!
//! ### Last Writer Wins
//! There is no versioning. Two peers painting the same pixel concurrently end
//! up with whichever edit reached the server last, because the server echoes
//! every applied edit back to its origin as well.
//!
//! ### Liveness
//! A closed or failed connection releases the peer at once. A peer whose
//! connection stays open but goes quiet for longer than the configured timeout
//! is released as if it had disconnected.
//!
//! ## Module Organization
//!
//! - `peer_registry`: fixed-capacity slot table, admission and release
//! - `engine`: frame-in, frames-out state machine
//! - `network`: listener, per-connection tasks, event loop, graceful shutdown
//! - `persistence`: the canvas save file
//! - `config`: runtime settings
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::start(ServerConfig::default()).await?;
//!
//!     // Runs until Ctrl-C, then disconnects peers and saves the canvas
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Limitations
//!
//! There is no rate limiting: a burst of deltas from one peer is broadcast to
//! everyone as fast as it arrives. Canvas edits are bounded by human input
//! speed, so this is accepted. Outgoing frames queue per peer without a bound,
//! so a peer that keeps heartbeating but stops reading holds its backlog in
//! server memory until it leaves.

pub mod config;
pub mod engine;
pub mod network;
pub mod peer_registry;
pub mod persistence;
