//! Fixed-capacity table of connected peers.
//!
//! This module tracks which network addresses currently hold a slot:
//! - Admission into the lowest free slot, rejected outright when full
//! - Release on disconnect or timeout, idempotent
//! - Liveness bookkeeping for silent peers
//! - Slot-ordered iteration for broadcast fan-out
//!
//! `admit` and `release` (plus the bulk `release_all`) are the only mutators of
//! slot occupancy. A slot index carries no identity beyond capacity accounting.

use log::info;
use shared::SyncError;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Index of an occupied slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where an admitted peer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Receiving deltas and broadcasts.
    Admitted,
    /// The server has asked it to disconnect and is waiting for the goodbye.
    Closing,
}

#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub state: PeerState,
    /// Last time any frame arrived from this peer
    pub last_seen: Instant,
}

impl Peer {
    fn new(addr: SocketAddr, now: Instant) -> Self {
        Self {
            addr,
            state: PeerState::Admitted,
            last_seen: now,
        }
    }

    pub fn is_timed_out(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Bounded registry of peers, owned by the synchronization engine.
pub struct PeerRegistry {
    slots: Vec<Option<Peer>>,
}

impl PeerRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
        }
    }

    /// Places `addr` in the lowest free slot.
    ///
    /// An address that already holds a slot gets that slot back without
    /// consuming another one. When every slot is taken the registry is left
    /// untouched and `CapacityExceeded` is returned.
    pub fn admit(&mut self, addr: SocketAddr, now: Instant) -> Result<SlotId, SyncError> {
        if let Some(slot) = self.find_by_addr(addr) {
            self.touch(slot, now);
            return Ok(slot);
        }

        let index = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SyncError::CapacityExceeded)?;

        self.slots[index] = Some(Peer::new(addr, now));
        info!("Peer {} admitted into slot #{}", addr, index);
        Ok(SlotId(index))
    }

    /// Frees a slot, returning the peer that held it. Freeing an empty slot is a no-op.
    pub fn release(&mut self, slot: SlotId) -> Option<Peer> {
        let peer = self.slots.get_mut(slot.0)?.take()?;
        info!("Peer {} released slot {}", peer.addr, slot);
        Some(peer)
    }

    /// Frees every slot, returning how many were occupied.
    pub fn release_all(&mut self) -> usize {
        let mut released = 0;
        for slot in self.slots.iter_mut() {
            if slot.take().is_some() {
                released += 1;
            }
        }
        released
    }

    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|slot| matches!(slot, Some(peer) if peer.addr == addr))
            .map(SlotId)
    }

    pub fn get(&self, slot: SlotId) -> Option<&Peer> {
        self.slots.get(slot.0)?.as_ref()
    }

    /// Records that a frame just arrived from the peer in `slot`.
    pub fn touch(&mut self, slot: SlotId, now: Instant) {
        if let Some(Some(peer)) = self.slots.get_mut(slot.0) {
            peer.last_seen = now;
        }
    }

    /// Moves every admitted peer to `Closing`.
    pub fn mark_all_closing(&mut self) {
        for peer in self.slots.iter_mut().flatten() {
            peer.state = PeerState::Closing;
        }
    }

    /// Invokes `f` once per occupied slot, in slot order.
    pub fn for_each_occupied<F>(&self, mut f: F)
    where
        F: FnMut(SlotId, &Peer),
    {
        for (index, slot) in self.slots.iter().enumerate() {
            if let Some(peer) = slot {
                f(SlotId(index), peer);
            }
        }
    }

    /// Addresses of every occupied slot, in slot order.
    pub fn addrs(&self) -> Vec<SocketAddr> {
        let mut addrs = Vec::with_capacity(self.len());
        self.for_each_occupied(|_, peer| addrs.push(peer.addr));
        addrs
    }

    /// Slots whose peer has been silent for longer than `timeout`.
    pub fn timed_out(&self, now: Instant, timeout: Duration) -> Vec<SlotId> {
        let mut expired = Vec::new();
        self.for_each_occupied(|slot, peer| {
            if peer.is_timed_out(now, timeout) {
                expired.push(slot);
            }
        });
        expired
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of occupied slots
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }
}
