use std::net::SocketAddrV4;

use crate::framer::Framer;

/// Number of round-trip samples kept per peer; "fully tested" once full.
pub const LATENCY_RING_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    HandshakeHalf,
    HandshakeComplete,
    Active,
    Closing,
}

/// Fixed-size ring of recent round-trip samples, milliseconds.
#[derive(Clone, Debug, Default)]
pub struct LatencyRing {
    samples: [f64; LATENCY_RING_SIZE],
    count: usize,
    next: usize,
}

impl LatencyRing {
    pub fn push(&mut self, sample_ms: f64) {
        self.samples[self.next] = sample_ms;
        self.next = (self.next + 1) % LATENCY_RING_SIZE;
        self.count = (self.count + 1).min(LATENCY_RING_SIZE);
    }

    pub fn is_full(&self) -> bool {
        self.count == LATENCY_RING_SIZE
    }

    pub fn average(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.samples[..self.count].iter().sum::<f64>() / self.count as f64)
    }
}

#[derive(Clone, Debug, Default)]
pub struct HandshakeFlags {
    pub them_accept_us: bool,
    pub us_accept_them: bool,
}

impl HandshakeFlags {
    pub fn complete(&self) -> bool {
        self.them_accept_us && self.us_accept_them
    }
}

#[derive(Clone, Debug, Default)]
pub struct PingState {
    pub nonce: Option<u64>,
    pub sent_ts: u64,
}

/// A bound peer connection: everything the engine needs to drive its state
/// machine, independent of the socket itself (owned separately by the
/// connection task / engine write-half table).
pub struct PeerSlot {
    pub index: usize,
    pub address: Option<SocketAddrV4>,
    pub state: PeerState,
    pub connection_start_ms: u64,
    pub handshake_start_ms: u64,
    pub handshake: HandshakeFlags,
    pub chain_height: u32,
    pub ping: PingState,
    pub latency_ring: LatencyRing,
    /// All-zero means idle.
    pub requesting: [u8; 32],
    pub last_heard_ms: u64,
    pub framer: Framer,
}

impl PeerSlot {
    pub fn unbound(index: usize, magic: u32, framer_capacity: usize) -> Self {
        PeerSlot {
            index,
            address: None,
            state: PeerState::Connecting,
            connection_start_ms: 0,
            handshake_start_ms: 0,
            handshake: HandshakeFlags::default(),
            chain_height: 0,
            ping: PingState::default(),
            latency_ring: LatencyRing::default(),
            requesting: [0; 32],
            last_heard_ms: 0,
            framer: Framer::new(magic, framer_capacity),
        }
    }

    pub fn bind(&mut self, address: SocketAddrV4, now_ms: u64, magic: u32, framer_capacity: usize) {
        self.address = Some(address);
        self.state = PeerState::Connecting;
        self.connection_start_ms = now_ms;
        self.handshake_start_ms = now_ms;
        self.handshake = HandshakeFlags::default();
        self.chain_height = 0;
        self.ping = PingState::default();
        self.latency_ring = LatencyRing::default();
        self.requesting = [0; 32];
        self.last_heard_ms = now_ms;
        self.framer = Framer::new(magic, framer_capacity);
    }

    pub fn is_bound(&self) -> bool {
        self.address.is_some()
    }

    pub fn is_idle_for_blocks(&self) -> bool {
        self.state == PeerState::Active && self.requesting == [0; 32]
    }

    pub fn is_handshaken(&self) -> bool {
        matches!(self.state, PeerState::HandshakeComplete | PeerState::Active)
    }

    pub fn mark_requesting(&mut self, hash: [u8; 32]) {
        self.requesting = hash;
    }

    pub fn clear_requesting(&mut self) {
        self.requesting = [0; 32];
    }

    /// Records one half of the handshake; returns true if both halves are
    /// now set, at which point the caller transitions to `HandshakeComplete`.
    pub fn accept_them(&mut self, chain_height: u32) -> bool {
        self.handshake.them_accept_us = true;
        self.chain_height = chain_height;
        if self.state == PeerState::Connecting {
            self.state = PeerState::HandshakeHalf;
        }
        self.handshake.complete()
    }

    pub fn accept_us(&mut self) -> bool {
        self.handshake.us_accept_them = true;
        if self.state == PeerState::Connecting {
            self.state = PeerState::HandshakeHalf;
        }
        self.handshake.complete()
    }

    pub fn handshake_elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.handshake_start_ms)
    }

    pub fn connection_age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.connection_start_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_completes_only_after_both_flags() {
        let mut slot = PeerSlot::unbound(0, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        assert!(!slot.accept_them(100));
        assert_eq!(slot.state, PeerState::HandshakeHalf);
        assert!(slot.accept_us());
    }

    #[test]
    fn latency_ring_reports_full_only_after_wrap() {
        let mut ring = LatencyRing::default();
        for i in 0..LATENCY_RING_SIZE - 1 {
            ring.push(i as f64);
            assert!(!ring.is_full());
        }
        ring.push(100.0);
        assert!(ring.is_full());
    }

    #[test]
    fn requesting_tracks_single_in_flight_block() {
        let mut slot = PeerSlot::unbound(0, 0xD9B4BEF9, crate::framer::MIN_CAPACITY);
        slot.state = PeerState::Active;
        assert!(slot.is_idle_for_blocks());
        slot.mark_requesting([9; 32]);
        assert!(!slot.is_idle_for_blocks());
        slot.clear_requesting();
        assert!(slot.is_idle_for_blocks());
    }
}
