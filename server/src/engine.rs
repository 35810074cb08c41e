//! Authoritative canvas state machine.
//!
//! The engine owns the canvas and the peer registry and turns each inbound
//! frame into the frames that must go out in response. It performs no I/O
//! itself, which keeps the event loop in `network` thin and lets every protocol
//! rule be exercised without sockets.
//!
//! Per-peer lifecycle: `Connecting -> Admitted -> Disconnected`. A Connect
//! message is the Connecting event; admission succeeds whenever a slot is free
//! and is answered with a snapshot for that peer alone.
//!
//! Events are handled strictly one at a time, so the sequence of deltas applied
//! to the canvas is a total order and every peer receives a suffix of it.

use crate::peer_registry::{PeerRegistry, PeerState, SlotId};
use bytes::Bytes;
use log::{debug, error, info, warn};
use shared::{Canvas, Control, Packet, PixelEdit};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Something the engine wants done to a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Queue one frame for the connection.
    Send { addr: SocketAddr, frame: Bytes },
    /// Flush whatever is queued for the connection, then close it.
    Close { addr: SocketAddr },
}

impl Outbound {
    fn control(addr: SocketAddr, control: Control) -> Self {
        Outbound::Send {
            addr,
            frame: Bytes::from(control.to_frame()),
        }
    }

    pub fn addr(&self) -> SocketAddr {
        match self {
            Outbound::Send { addr, .. } | Outbound::Close { addr } => *addr,
        }
    }
}

pub struct SyncEngine {
    canvas: Canvas,
    peers: PeerRegistry,
    accepting: bool,
}

impl SyncEngine {
    pub fn new(canvas: Canvas, max_peers: usize) -> Self {
        Self {
            canvas,
            peers: PeerRegistry::new(max_peers),
            accepting: true,
        }
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn peers(&self) -> &PeerRegistry {
        &self.peers
    }

    /// False once shutdown has begun.
    pub fn is_accepting(&self) -> bool {
        self.accepting
    }

    pub fn is_admitted(&self, addr: SocketAddr) -> bool {
        self.peers.find_by_addr(addr).is_some()
    }

    /// Processes one inbound frame.
    ///
    /// Malformed input, out-of-range edits and frames from connections that
    /// were never admitted are logged and dropped; none of them touch shared
    /// state.
    pub fn handle_frame(
        &mut self,
        addr: SocketAddr,
        frame: &[u8],
        now: Instant,
    ) -> Vec<Outbound> {
        let packet = match Packet::from_frame(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Discarding frame from {}: {}", addr, e);
                return Vec::new();
            }
        };

        let slot = self.peers.find_by_addr(addr);
        if let Some(slot) = slot {
            self.peers.touch(slot, now);
        }

        match (packet, slot) {
            (Packet::Control(Control::Connect), _) => self.on_connect(addr, now),
            (Packet::Control(Control::Disconnect), Some(slot)) => self.on_disconnect(slot),
            (Packet::Control(Control::Heartbeat), Some(_)) => Vec::new(),
            (Packet::Delta(edit), Some(slot)) => self.on_delta(slot, edit),
            (packet, None) => {
                debug!("Ignoring {} from unadmitted {}", packet.kind(), addr);
                Vec::new()
            }
            (packet, Some(slot)) => {
                warn!("Unexpected {} from peer in slot {}", packet.kind(), slot);
                Vec::new()
            }
        }
    }

    /// The connection to `addr` is gone: an implicit disconnect.
    pub fn connection_lost(&mut self, addr: SocketAddr) {
        if let Some(slot) = self.peers.find_by_addr(addr) {
            self.peers.release(slot);
            info!("Lost connection to {} (slot {})", addr, slot);
        }
    }

    fn on_connect(&mut self, addr: SocketAddr, now: Instant) -> Vec<Outbound> {
        if !self.accepting {
            info!("Refusing {} while shutting down", addr);
            return Self::reject(addr);
        }

        let slot = match self.peers.admit(addr, now) {
            Ok(slot) => slot,
            Err(e) => {
                warn!("Rejecting {}: {}", addr, e);
                return Self::reject(addr);
            }
        };

        match Packet::Snapshot(self.canvas.clone()).to_frame() {
            Ok(frame) => {
                info!(
                    "Sending {}x{} snapshot to {} (slot {})",
                    self.canvas.width(),
                    self.canvas.height(),
                    addr,
                    slot
                );
                vec![Outbound::Send {
                    addr,
                    frame: Bytes::from(frame),
                }]
            }
            Err(e) => {
                error!("Failed to encode snapshot for {}: {}", addr, e);
                self.peers.release(slot);
                vec![Outbound::Close { addr }]
            }
        }
    }

    fn reject(addr: SocketAddr) -> Vec<Outbound> {
        vec![
            Outbound::control(addr, Control::Rejected),
            Outbound::Close { addr },
        ]
    }

    fn on_disconnect(&mut self, slot: SlotId) -> Vec<Outbound> {
        let Some(peer) = self.peers.release(slot) else {
            return Vec::new();
        };

        let close = Outbound::Close { addr: peer.addr };
        match peer.state {
            // Peer-initiated goodbye gets an acknowledgment
            PeerState::Admitted => vec![Outbound::control(peer.addr, Control::Disconnect), close],
            PeerState::Closing => vec![close],
        }
    }

    fn on_delta(&mut self, slot: SlotId, edit: PixelEdit) -> Vec<Outbound> {
        if !self.accepting {
            debug!("Canvas frozen for shutdown, dropping delta from slot {}", slot);
            return Vec::new();
        }

        if let Err(e) = self.canvas.apply(&edit) {
            warn!("Discarding delta from slot {}: {}", slot, e);
            return Vec::new();
        }

        match Packet::Delta(edit).to_frame() {
            Ok(frame) => {
                debug!(
                    "Applied ({}, {}) = {:?} from slot {}, broadcasting to {} peers",
                    edit.row,
                    edit.col,
                    edit.color,
                    slot,
                    self.peers.len()
                );
                self.broadcast(Bytes::from(frame))
            }
            Err(e) => {
                error!("Failed to encode delta: {}", e);
                Vec::new()
            }
        }
    }

    /// One copy of `frame` per occupied slot, in slot order. The origin is included.
    fn broadcast(&self, frame: Bytes) -> Vec<Outbound> {
        let mut outbound = Vec::with_capacity(self.peers.len());
        self.peers.for_each_occupied(|_, peer| {
            outbound.push(Outbound::Send {
                addr: peer.addr,
                frame: frame.clone(),
            });
        });
        outbound
    }

    /// Releases and closes peers that have been silent longer than `timeout`.
    pub fn expire_idle(&mut self, now: Instant, timeout: Duration) -> Vec<Outbound> {
        let mut outbound = Vec::new();
        for slot in self.peers.timed_out(now, timeout) {
            if let Some(peer) = self.peers.release(slot) {
                warn!("Peer {} timed out after {:?} of silence", peer.addr, timeout);
                outbound.push(Outbound::Close { addr: peer.addr });
            }
        }
        outbound
    }

    /// Stops admission, freezes the canvas and asks every peer to disconnect.
    pub fn begin_shutdown(&mut self) -> Vec<Outbound> {
        self.accepting = false;
        self.peers.mark_all_closing();

        let mut outbound = Vec::with_capacity(self.peers.len());
        self.peers.for_each_occupied(|_, peer| {
            outbound.push(Outbound::control(peer.addr, Control::Disconnect));
        });
        outbound
    }

    /// Drops every remaining peer without waiting for it.
    pub fn release_all(&mut self) -> Vec<Outbound> {
        let addrs = self.peers.addrs();
        self.peers.release_all();
        addrs
            .into_iter()
            .map(|addr| Outbound::Close { addr })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{FillRule, Rgb, SyncError};
    use tokio_test::assert_ok;

    const RED: Rgb = Rgb::new(255, 0, 0);

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn black_engine(size: i16, max_peers: usize) -> SyncEngine {
        let canvas = Canvas::new(size, size, FillRule::Solid(Rgb::BLACK)).unwrap();
        SyncEngine::new(canvas, max_peers)
    }

    fn send(engine: &mut SyncEngine, port: u16, control: Control) -> Vec<Outbound> {
        engine.handle_frame(addr(port), &control.to_frame(), Instant::now())
    }

    fn connect(engine: &mut SyncEngine, port: u16) -> Vec<Outbound> {
        send(engine, port, Control::Connect)
    }

    fn delta_frame(row: i16, col: i16, color: Rgb) -> Vec<u8> {
        Packet::Delta(PixelEdit::new(row, col, color))
            .to_frame()
            .unwrap()
    }

    fn decode(outbound: &Outbound) -> Packet {
        match outbound {
            Outbound::Send { frame, .. } => assert_ok!(Packet::from_frame(frame)),
            Outbound::Close { addr } => panic!("expected a frame, got close of {}", addr),
        }
    }

    #[test]
    fn test_connect_sends_snapshot_to_newcomer_only() {
        let mut engine = black_engine(2, 8);
        connect(&mut engine, 1000);

        let out = connect(&mut engine, 1001);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].addr(), addr(1001));
        assert_eq!(decode(&out[0]), Packet::Snapshot(engine.canvas().clone()));
        assert_eq!(engine.peers().len(), 2);
    }

    #[test]
    fn test_delta_is_applied_and_broadcast_to_everyone() {
        let mut engine = black_engine(2, 8);
        connect(&mut engine, 1000);
        connect(&mut engine, 1001);
        connect(&mut engine, 1002);

        let sent = delta_frame(0, 1, RED);
        let out = engine.handle_frame(addr(1001), &sent, Instant::now());

        assert_eq!(engine.canvas().get_pixel(0, 1).unwrap(), RED);
        let targets: Vec<SocketAddr> = out.iter().map(Outbound::addr).collect();
        assert_eq!(targets, vec![addr(1000), addr(1001), addr(1002)]);
        for o in &out {
            assert!(matches!(o, Outbound::Send { frame, .. } if *frame == sent));
        }
    }

    #[test]
    fn test_out_of_bounds_delta_is_discarded() {
        let mut engine = SyncEngine::new(Canvas::new(3, 3, FillRule::Diagonal).unwrap(), 8);
        connect(&mut engine, 1000);
        let before = engine.canvas().clone();

        let out = engine.handle_frame(addr(1000), &delta_frame(5, 0, RED), Instant::now());
        assert!(out.is_empty());
        assert_eq!(*engine.canvas(), before);

        let out = engine.handle_frame(addr(1000), &delta_frame(0, -1, RED), Instant::now());
        assert!(out.is_empty());
        assert_eq!(*engine.canvas(), before);
    }

    #[test]
    fn test_malformed_frame_is_discarded() {
        let mut engine = black_engine(2, 8);
        connect(&mut engine, 1000);
        let before = engine.canvas().clone();

        for frame in [vec![], vec![0x01; 5], vec![0x07, 0, 0], vec![0x00, 0xee]] {
            let out = engine.handle_frame(addr(1000), &frame, Instant::now());
            assert!(out.is_empty());
        }

        assert_eq!(*engine.canvas(), before);
        assert!(engine.is_admitted(addr(1000)));
    }

    #[test]
    fn test_snapshot_from_peer_is_ignored() {
        let mut engine = black_engine(2, 8);
        connect(&mut engine, 1000);

        let other = Canvas::new(2, 2, FillRule::Solid(RED)).unwrap();
        let frame = Packet::Snapshot(other).to_frame().unwrap();
        let out = engine.handle_frame(addr(1000), &frame, Instant::now());
        assert!(out.is_empty());
        assert_eq!(engine.canvas().get_pixel(1, 1).unwrap(), Rgb::BLACK);
    }

    #[test]
    fn test_delta_from_unadmitted_address_is_ignored() {
        let mut engine = black_engine(2, 8);
        connect(&mut engine, 1000);

        let out = engine.handle_frame(addr(2000), &delta_frame(0, 0, RED), Instant::now());
        assert!(out.is_empty());
        assert_eq!(engine.canvas().get_pixel(0, 0).unwrap(), Rgb::BLACK);
    }

    #[test]
    fn test_connect_beyond_capacity_is_rejected_and_closed() {
        let mut engine = black_engine(2, 2);
        connect(&mut engine, 1000);
        connect(&mut engine, 1001);

        let out = connect(&mut engine, 1002);
        assert_eq!(
            out,
            vec![
                Outbound::control(addr(1002), Control::Rejected),
                Outbound::Close { addr: addr(1002) },
            ]
        );
        assert_eq!(engine.peers().addrs(), vec![addr(1000), addr(1001)]);

        // Rejected addresses never receive broadcasts
        let out = engine.handle_frame(addr(1000), &delta_frame(1, 1, RED), Instant::now());
        assert!(out.iter().all(|o| o.addr() != addr(1002)));
    }

    #[test]
    fn test_duplicate_connect_resends_snapshot_without_new_slot() {
        let mut engine = black_engine(2, 2);
        connect(&mut engine, 1000);
        let out = connect(&mut engine, 1000);

        assert_eq!(out.len(), 1);
        assert!(matches!(decode(&out[0]), Packet::Snapshot(_)));
        assert_eq!(engine.peers().len(), 1);
    }

    #[test]
    fn test_peer_disconnect_is_acknowledged_and_frees_slot() {
        let mut engine = black_engine(2, 1);
        connect(&mut engine, 1000);

        let out = send(&mut engine, 1000, Control::Disconnect);
        assert_eq!(
            out,
            vec![
                Outbound::control(addr(1000), Control::Disconnect),
                Outbound::Close { addr: addr(1000) },
            ]
        );
        assert!(engine.peers().is_empty());

        // The freed slot can be taken again
        let out = connect(&mut engine, 1001);
        assert!(matches!(decode(&out[0]), Packet::Snapshot(_)));
    }

    #[test]
    fn test_lost_connection_frees_slot() {
        let mut engine = black_engine(2, 1);
        connect(&mut engine, 1000);

        engine.connection_lost(addr(1000));
        assert!(engine.peers().is_empty());

        // Unknown connections are a no-op
        engine.connection_lost(addr(4242));
        let out = connect(&mut engine, 1001);
        assert!(matches!(decode(&out[0]), Packet::Snapshot(_)));
    }

    #[test]
    fn test_expire_idle_peers() {
        let mut engine = black_engine(2, 4);
        let start = Instant::now();
        engine.handle_frame(addr(1000), &Control::Connect.to_frame(), start);
        engine.handle_frame(addr(1001), &Control::Connect.to_frame(), start);

        let later = start + Duration::from_secs(6);
        engine.handle_frame(addr(1001), &Control::Heartbeat.to_frame(), later);

        let out = engine.expire_idle(later, Duration::from_secs(5));
        assert_eq!(out, vec![Outbound::Close { addr: addr(1000) }]);
        assert_eq!(engine.peers().addrs(), vec![addr(1001)]);
    }

    #[test]
    fn test_shutdown_sequence() {
        let mut engine = black_engine(2, 4);
        connect(&mut engine, 1000);
        connect(&mut engine, 1001);

        let out = engine.begin_shutdown();
        assert!(!engine.is_accepting());
        assert_eq!(
            out,
            vec![
                Outbound::control(addr(1000), Control::Disconnect),
                Outbound::control(addr(1001), Control::Disconnect),
            ]
        );

        // New peers are refused, the canvas is frozen
        assert_eq!(connect(&mut engine, 1002), SyncEngine::reject(addr(1002)));
        let out = engine.handle_frame(addr(1000), &delta_frame(0, 0, RED), Instant::now());
        assert!(out.is_empty());
        assert_eq!(engine.canvas().get_pixel(0, 0).unwrap(), Rgb::BLACK);

        // An acknowledgment closes the connection without another reply
        let out = send(&mut engine, 1000, Control::Disconnect);
        assert_eq!(out, vec![Outbound::Close { addr: addr(1000) }]);
        assert_eq!(engine.peers().len(), 1);

        assert_eq!(
            engine.release_all(),
            vec![Outbound::Close { addr: addr(1001) }]
        );
        assert!(engine.peers().is_empty());
    }

    #[test]
    fn test_convergence_of_applied_order() {
        let mut engine = black_engine(4, 8);
        connect(&mut engine, 1000);
        connect(&mut engine, 1001);

        let mut mirror_a = engine.canvas().clone();
        let mut mirror_b = engine.canvas().clone();

        let edits = [
            (1000, PixelEdit::new(0, 0, RED)),
            (1001, PixelEdit::new(0, 0, Rgb::WHITE)),
            (1001, PixelEdit::new(3, 2, Rgb::new(1, 2, 3))),
            (1000, PixelEdit::new(3, 2, Rgb::new(9, 9, 9))),
            (1000, PixelEdit::new(9, 9, RED)),
        ];

        for (port, edit) in edits {
            let frame = Packet::Delta(edit).to_frame().unwrap();
            for o in engine.handle_frame(addr(port), &frame, Instant::now()) {
                let Packet::Delta(applied) = decode(&o) else {
                    panic!("expected a delta");
                };
                let mirror = if o.addr() == addr(1000) {
                    &mut mirror_a
                } else {
                    &mut mirror_b
                };
                mirror.apply(&applied).unwrap();
            }
        }

        assert_eq!(mirror_a, *engine.canvas());
        assert_eq!(mirror_b, *engine.canvas());
        assert_eq!(engine.canvas().get_pixel(0, 0).unwrap(), Rgb::WHITE);
        assert!(matches!(
            engine.canvas().get_pixel(9, 9),
            Err(SyncError::OutOfBounds { .. })
        ));
    }
}
